//! End-to-end relay tests against a fake cluster debug proxy
//!
//! The fake proxy speaks the real wire protocol over TCP: pod lookups,
//! port-forward handshakes, then frame echo on accepted streams. This
//! exercises `ApiServerClient` and `TunnelEngine` together the way the CLI
//! uses them.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use poddebug_proto::{
    read_frame, read_message, write_frame, write_message, Channel, Frame, Reply, Request,
    PROTOCOL_VERSION,
};
use poddebug_tunnel::{ApiServerClient, ClusterClient, ClusterError, ComponentSelector, TunnelEngine, TunnelError};

const POD_NAME: &str = "web-7f9c";

#[derive(Clone, Copy, PartialEq)]
enum ProxyMode {
    /// Accept handshakes and echo data frames back
    Echo,
    /// Refuse every port-forward handshake
    RefusePortForward,
    /// Report no pod for any component
    PodMissing,
    /// Report the pod as not ready
    PodUnready,
}

/// Spawn a fake debug proxy, returning its address
async fn spawn_proxy(mode: ProxyMode) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(handle_proxy_connection(stream, mode));
        }
    });

    addr
}

async fn handle_proxy_connection(mut stream: TcpStream, mode: ProxyMode) {
    let request: Request = match read_message(&mut stream).await {
        Ok(Some(request)) => request,
        _ => return,
    };

    match request {
        Request::PodLookup { component, .. } => {
            let reply = match mode {
                ProxyMode::PodMissing => Reply::PodNotFound,
                ProxyMode::PodUnready => Reply::PodFound {
                    pod_name: format!("{}-pod", component),
                    ready: false,
                },
                _ => Reply::PodFound {
                    pod_name: POD_NAME.to_string(),
                    ready: true,
                },
            };
            let _ = write_message(&mut stream, &reply).await;
        }
        Request::PortForward { version, .. } => {
            if version != PROTOCOL_VERSION {
                let reply = Reply::PortForwardRefused {
                    reason: format!("unsupported protocol version {}", version),
                };
                let _ = write_message(&mut stream, &reply).await;
                return;
            }
            if mode == ProxyMode::RefusePortForward {
                let reply = Reply::PortForwardRefused {
                    reason: "debug port not exposed".to_string(),
                };
                let _ = write_message(&mut stream, &reply).await;
                return;
            }

            let reply = Reply::PortForwardAccepted {
                channels: vec![Channel::Data, Channel::Error],
            };
            if write_message(&mut stream, &reply).await.is_err() {
                return;
            }

            // Echo data frames until FIN or EOF
            loop {
                match read_frame(&mut stream).await {
                    Ok(Some(frame)) if frame.channel == Channel::Data => {
                        if frame.flags.has_fin() {
                            let _ = write_frame(&mut stream, &Frame::fin()).await;
                            break;
                        }
                        if write_frame(&mut stream, &Frame::data(frame.payload)).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        }
    }
}

fn selector() -> ComponentSelector {
    ComponentSelector {
        component: "web".to_string(),
        application: "app".to_string(),
        namespace: "ns".to_string(),
    }
}

#[tokio::test]
async fn resolve_pod_returns_ready_pod() {
    let addr = spawn_proxy(ProxyMode::Echo).await;
    let client = ApiServerClient::new(addr);

    let pod = client.resolve_pod(&selector()).await.unwrap();
    assert_eq!(pod.name, POD_NAME);
}

#[tokio::test]
async fn resolve_pod_surfaces_missing_pod() {
    let addr = spawn_proxy(ProxyMode::PodMissing).await;
    let client = ApiServerClient::new(addr);

    match client.resolve_pod(&selector()).await {
        Err(ClusterError::PodNotFound(component)) => assert_eq!(component, "web"),
        other => panic!("expected PodNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn resolve_pod_surfaces_unready_pod() {
    let addr = spawn_proxy(ProxyMode::PodUnready).await;
    let client = ApiServerClient::new(addr);

    assert!(matches!(
        client.resolve_pod(&selector()).await,
        Err(ClusterError::PodNotReady(_))
    ));
}

#[tokio::test]
async fn tunnel_relays_data_both_ways() {
    let addr = spawn_proxy(ProxyMode::Echo).await;
    let client: Arc<dyn ClusterClient> = Arc::new(ApiServerClient::new(addr));

    let mut handle = TunnelEngine::open(client, POD_NAME, 5858, None).await.unwrap();
    let local_port = handle.local_port();

    let mut debugger = TcpStream::connect(("127.0.0.1", local_port)).await.unwrap();
    debugger.write_all(b"attach request").await.unwrap();

    let mut buf = vec![0u8; 64];
    let n = debugger.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"attach request");

    handle.close().await;
}

#[tokio::test]
async fn tunnel_serves_multiple_clients() {
    let addr = spawn_proxy(ProxyMode::Echo).await;
    let client: Arc<dyn ClusterClient> = Arc::new(ApiServerClient::new(addr));

    let mut handle = TunnelEngine::open(client, POD_NAME, 5858, None).await.unwrap();
    let local_port = handle.local_port();

    let mut tasks = Vec::new();
    for i in 0u8..4 {
        tasks.push(tokio::spawn(async move {
            let mut socket = TcpStream::connect(("127.0.0.1", local_port)).await.unwrap();
            let payload = vec![i; 512];
            socket.write_all(&payload).await.unwrap();

            let mut received = vec![0u8; 512];
            socket.read_exact(&mut received).await.unwrap();
            assert_eq!(received, payload);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    handle.close().await;
}

#[tokio::test]
async fn refused_handshake_fails_open_and_releases_port() {
    let addr = spawn_proxy(ProxyMode::RefusePortForward).await;
    let client: Arc<dyn ClusterClient> = Arc::new(ApiServerClient::new(addr));

    let requested = free_port().await;
    match TunnelEngine::open(client, POD_NAME, 5858, Some(requested)).await {
        Err(TunnelError::ConnectionRefused(reason)) => {
            assert!(reason.contains("not exposed"), "reason: {}", reason)
        }
        other => panic!("expected ConnectionRefused, got {:?}", other.map(|h| h.local_port())),
    }

    // The failed open must not leave the requested port bound
    TcpListener::bind(("127.0.0.1", requested)).await.unwrap();
}

#[tokio::test]
async fn stale_protocol_version_is_refused() {
    let addr = spawn_proxy(ProxyMode::Echo).await;

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    let request = Request::PortForward {
        version: PROTOCOL_VERSION + 1,
        pod_name: POD_NAME.to_string(),
        port: 5858,
        channels: vec![Channel::Data, Channel::Error],
    };
    write_message(&mut stream, &request).await.unwrap();

    match read_message(&mut stream).await.unwrap() {
        Some(Reply::PortForwardRefused { reason }) => {
            assert!(reason.contains("protocol version"), "reason: {}", reason)
        }
        other => panic!("expected PortForwardRefused, got {:?}", other),
    }
}

#[tokio::test]
async fn requested_port_in_use_is_reported() {
    let addr = spawn_proxy(ProxyMode::Echo).await;
    let client: Arc<dyn ClusterClient> = Arc::new(ApiServerClient::new(addr));

    let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = blocker.local_addr().unwrap().port();

    assert!(matches!(
        TunnelEngine::open(client, POD_NAME, 5858, Some(taken)).await,
        Err(TunnelError::PortInUse(port)) if port == taken
    ));
}

#[tokio::test]
async fn close_is_idempotent_and_releases_port() {
    let addr = spawn_proxy(ProxyMode::Echo).await;
    let client: Arc<dyn ClusterClient> = Arc::new(ApiServerClient::new(addr));

    let mut handle = TunnelEngine::open(client, POD_NAME, 5858, None).await.unwrap();
    let local_port = handle.local_port();

    handle.close().await;
    handle.close().await;

    // close() awaits the accept loop, so the listener is gone and the port
    // can be rebound immediately
    TcpListener::bind(("127.0.0.1", local_port)).await.unwrap();
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

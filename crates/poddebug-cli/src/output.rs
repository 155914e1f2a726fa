//! Output rendering: human lines or machine-readable JSON
//!
//! Machine mode emits exactly one structured object per invocation so
//! tooling can parse stdout without scraping. When a payload fails to
//! serialize, the human line is emitted instead of nothing.

use serde::Serialize;

use poddebug_store::DebugSession;

/// Output format selected with `-o`
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessPayload<'a> {
    kind: &'static str,
    status: &'static str,
    spec: &'a DebugSession,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorPayload<'a> {
    kind: &'static str,
    status: &'static str,
    message: &'a str,
}

fn to_json<T: Serialize>(payload: &T) -> Option<String> {
    serde_json::to_string(payload).ok()
}

/// Emit a session record as a success object (machine) or one line (human)
pub fn render_session(format: OutputFormat, human_line: &str, session: &DebugSession) {
    match format {
        OutputFormat::Human => println!("{}", human_line),
        OutputFormat::Json => {
            let payload = SuccessPayload {
                kind: "DebugSession",
                status: "success",
                spec: session,
            };
            match to_json(&payload) {
                Some(json) => println!("{}", json),
                None => println!("{}", human_line),
            }
        }
    }
}

/// Emit a plain confirmation with no record attached
pub fn render_message(format: OutputFormat, message: &str) {
    match format {
        OutputFormat::Human => println!("{}", message),
        OutputFormat::Json => {
            let payload = ErrorPayload {
                kind: "DebugSession",
                status: "success",
                message,
            };
            match to_json(&payload) {
                Some(json) => println!("{}", json),
                None => println!("{}", message),
            }
        }
    }
}

/// Emit a user-visible failure; pairs with exit code 1
pub fn render_error(format: OutputFormat, message: &str) {
    match format {
        OutputFormat::Human => eprintln!("{}", message),
        OutputFormat::Json => {
            let payload = ErrorPayload {
                kind: "DebugSession",
                status: "error",
                message,
            };
            match to_json(&payload) {
                Some(json) => println!("{}", json),
                None => eprintln!("{}", message),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde::Serializer;

    #[test]
    fn test_success_payload_shape() {
        let session = DebugSession {
            component_name: "web".to_string(),
            application_name: "app".to_string(),
            namespace: "ns".to_string(),
            local_port: 50000,
            remote_port: 5858,
            pod_name: "web-7f9c".to_string(),
            process_id: 4242,
            started_at: Utc::now(),
        };
        let payload = SuccessPayload {
            kind: "DebugSession",
            status: "success",
            spec: &session,
        };

        let json = to_json(&payload).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["kind"], "DebugSession");
        assert_eq!(value["status"], "success");
        assert_eq!(value["spec"]["componentName"], "web");
        assert_eq!(value["spec"]["localPort"], 50000);
    }

    #[test]
    fn test_unserializable_payload_is_none() {
        struct Broken;
        impl Serialize for Broken {
            fn serialize<S: Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("unrepresentable"))
            }
        }

        assert!(to_json(&Broken).is_none());
    }
}

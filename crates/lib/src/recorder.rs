//! Host-side recording action consumers.
//!
//! [`ProgramRecorder`] runs an external program per record command. No shell is used;
//! arguments are passed as a list with placeholders substituted. When an output file is
//! configured and a delivery client attached, the file is sent back to the conversation
//! the command came from once the program exits successfully.

use crate::api::{ApiClient, FileReply};
use crate::config::RecorderConfig;
use crate::dispatch::{CommandListener, RecordRequest};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use tokio::runtime::Handle;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Logs record commands and connectivity changes; for hosts without a recorder.
pub struct LoggingListener;

impl CommandListener for LoggingListener {
    fn on_record_command(&self, request: &RecordRequest) {
        log::info!(
            "record {}s requested by {} in {}",
            request.duration_seconds,
            request.sender_id,
            request.conversation_id
        );
    }

    fn on_connection_status_changed(&self, connected: bool) {
        log::info!("remote control {}", if connected { "connected" } else { "disconnected" });
    }
}

#[derive(Clone)]
struct Delivery {
    api: Arc<dyn ApiClient>,
    runtime: Handle,
}

/// Spawns `program args...` for each record command without waiting for it.
pub struct ProgramRecorder {
    program: String,
    args: Vec<String>,
    output: Option<String>,
    delivery: Option<Delivery>,
}

impl ProgramRecorder {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            output: None,
            delivery: None,
        }
    }

    /// `None` when no program is configured.
    pub fn from_config(config: &RecorderConfig) -> Option<Self> {
        let program = config.program.as_ref()?.trim();
        if program.is_empty() {
            return None;
        }
        let mut recorder = Self::new(program, config.args.clone());
        if let Some(output) = config.output.as_ref().filter(|o| !o.trim().is_empty()) {
            recorder = recorder.with_output(output.trim());
        }
        Some(recorder)
    }

    /// Path template of the file the program produces.
    pub fn with_output(mut self, template: impl Into<String>) -> Self {
        self.output = Some(template.into());
        self
    }

    /// Send the produced file back through `api`; uploads run on `runtime`.
    pub fn with_delivery(mut self, api: Arc<dyn ApiClient>, runtime: Handle) -> Self {
        self.delivery = Some(Delivery { api, runtime });
        self
    }

    /// Output path for `request`, recorded at `timestamp`.
    pub fn output_path(&self, request: &RecordRequest, timestamp: &str) -> Option<PathBuf> {
        let template = self.output.as_ref()?;
        Some(PathBuf::from(expand(template, request, timestamp, "")))
    }

    /// Arguments for `request` with `{duration}`, `{conversationId}`, `{conversationType}`,
    /// `{senderId}`, `{timestamp}` and `{output}` replaced.
    pub fn render_args(&self, request: &RecordRequest, timestamp: &str) -> Vec<String> {
        let output = self
            .output_path(request, timestamp)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        self.args
            .iter()
            .map(|a| expand(a, request, timestamp, &output))
            .collect()
    }
}

fn expand(template: &str, request: &RecordRequest, timestamp: &str, output: &str) -> String {
    template
        .replace("{duration}", &request.duration_seconds.to_string())
        .replace("{conversationId}", &request.conversation_id)
        .replace("{conversationType}", &request.conversation_type)
        .replace("{senderId}", &request.sender_id)
        .replace("{timestamp}", timestamp)
        .replace("{output}", output)
}

/// Upload `path` to the conversation of `request`, on the delivery runtime.
fn send_back(delivery: &Delivery, request: &RecordRequest, path: PathBuf) {
    if !path.is_file() {
        log::warn!("recorder finished but {} does not exist", path.display());
        return;
    }
    let reply = FileReply {
        conversation_id: request.conversation_id.clone(),
        conversation_type: request.conversation_type.clone(),
        user_id: request.sender_id.clone(),
        path,
    };
    let api = Arc::clone(&delivery.api);
    delivery.runtime.spawn(async move {
        match api.send_file_reply(&reply).await {
            Ok(()) => log::info!("sent {} to {}", reply.path.display(), reply.conversation_id),
            Err(e) => log::error!("sending {} failed: {}", reply.path.display(), e),
        }
    });
}

impl CommandListener for ProgramRecorder {
    fn on_record_command(&self, request: &RecordRequest) {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        let args = self.render_args(request, &timestamp);
        let output = self.output_path(request, &timestamp);
        match Command::new(&self.program).args(&args).spawn() {
            Ok(mut child) => {
                log::info!(
                    "recorder started (pid {}) for {}s",
                    child.id(),
                    request.duration_seconds
                );
                let program = self.program.clone();
                let request = request.clone();
                let delivery = self.delivery.clone();
                std::thread::spawn(move || match child.wait() {
                    Ok(status) if status.success() => {
                        log::debug!("{} finished", program);
                        if let (Some(delivery), Some(path)) = (delivery, output) {
                            send_back(&delivery, &request, path);
                        }
                    }
                    Ok(status) => log::warn!("{} exited with {}", program, status),
                    Err(e) => log::warn!("waiting for {} failed: {}", program, e),
                });
            }
            Err(e) => log::error!("starting recorder {} failed: {}", self.program, e),
        }
    }

    fn on_connection_status_changed(&self, connected: bool) {
        log::info!("remote control {}", if connected { "connected" } else { "disconnected" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, Reply, StreamCredentials};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    fn request() -> RecordRequest {
        RecordRequest {
            conversation_id: "cid-7".to_string(),
            conversation_type: "2".to_string(),
            sender_id: "staff-3".to_string(),
            duration_seconds: 45,
        }
    }

    #[derive(Default)]
    struct CapturingApi {
        files: Mutex<Vec<(FileReply, Vec<u8>)>>,
    }

    #[async_trait]
    impl ApiClient for CapturingApi {
        async fn open_connection(&self) -> Result<StreamCredentials, ApiError> {
            Err(ApiError::Api("unused".to_string()))
        }

        async fn send_text_reply(&self, _reply: &Reply) -> Result<(), ApiError> {
            Ok(())
        }

        async fn send_file_reply(&self, reply: &FileReply) -> Result<(), ApiError> {
            let content = std::fs::read(&reply.path).unwrap_or_default();
            self.files.lock().expect("lock").push((reply.clone(), content));
            Ok(())
        }
    }

    #[test]
    fn placeholders_are_substituted() {
        let r = ProgramRecorder::new(
            "evcam-record",
            vec![
                "--seconds={duration}".to_string(),
                "{conversationId}".to_string(),
                "{conversationType}/{senderId}".to_string(),
                "--out={output}".to_string(),
                "literal".to_string(),
            ],
        )
        .with_output("/clips/{conversationId}_{timestamp}.mp4");
        assert_eq!(
            r.render_args(&request(), "20260101_120000"),
            vec![
                "--seconds=45",
                "cid-7",
                "2/staff-3",
                "--out=/clips/cid-7_20260101_120000.mp4",
                "literal"
            ]
        );
        assert_eq!(
            r.output_path(&request(), "20260101_120000"),
            Some(PathBuf::from("/clips/cid-7_20260101_120000.mp4"))
        );
    }

    #[test]
    fn output_placeholder_is_empty_without_output() {
        let r = ProgramRecorder::new("rec", vec!["{output}".to_string()]);
        assert_eq!(r.render_args(&request(), "t"), vec![""]);
        assert!(r.output_path(&request(), "t").is_none());
    }

    #[test]
    fn blank_program_means_no_recorder() {
        let mut c = RecorderConfig::default();
        assert!(ProgramRecorder::from_config(&c).is_none());
        c.program = Some("  ".to_string());
        assert!(ProgramRecorder::from_config(&c).is_none());
        c.program = Some("rec".to_string());
        c.output = Some(" /clips/{timestamp}.mp4 ".to_string());
        let r = ProgramRecorder::from_config(&c).expect("recorder");
        assert_eq!(
            r.output_path(&request(), "t"),
            Some(PathBuf::from("/clips/t.mp4"))
        );
    }

    #[test]
    fn missing_program_is_logged_not_fatal() {
        let r = ProgramRecorder::new("/nonexistent/evcam-recorder-binary", Vec::new());
        r.on_record_command(&request());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn produced_file_is_sent_back_to_the_conversation() {
        let dir = std::env::temp_dir().join(format!("evcam-rec-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let api = Arc::new(CapturingApi::default());
        let recorder = ProgramRecorder::new(
            "sh",
            vec![
                "-c".to_string(),
                "printf 'clip of %s s' \"$1\" > \"$0\"".to_string(),
                "{output}".to_string(),
                "{duration}".to_string(),
            ],
        )
        .with_output(format!("{}/{{conversationId}}_{{timestamp}}.mp4", dir.display()))
        .with_delivery(api.clone(), Handle::current());

        recorder.on_record_command(&request());

        for _ in 0..100 {
            if !api.files.lock().expect("lock").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let files = api.files.lock().expect("lock").clone();
        assert_eq!(files.len(), 1, "file sent back once");
        let (reply, content) = &files[0];
        assert_eq!(reply.conversation_id, "cid-7");
        assert_eq!(reply.conversation_type, "2");
        assert_eq!(reply.user_id, "staff-3");
        assert!(reply.path.starts_with(&dir));
        assert_eq!(content, b"clip of 45 s");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_recording_sends_nothing() {
        let api = Arc::new(CapturingApi::default());
        let recorder = ProgramRecorder::new("sh", vec!["-c".to_string(), "exit 3".to_string()])
            .with_output("/nonexistent/evcam/{timestamp}.mp4")
            .with_delivery(api.clone(), Handle::current());
        recorder.on_record_command(&request());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(api.files.lock().expect("lock").is_empty());
    }
}

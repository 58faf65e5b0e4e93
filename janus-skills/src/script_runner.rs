use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script_execution: {message}")]
    Execution {
        message: String,
        stderr: Option<String>,
    },

    #[error("script_timeout: {0}")]
    Timeout(String),

    #[error("script_invalid_json: {message}")]
    InvalidOutput {
        message: String,
        stderr: Option<String>,
    },
}

impl ScriptError {
    fn execution(message: String) -> Self {
        Self::Execution {
            message,
            stderr: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Execution { .. } => "script_execution",
            Self::Timeout(_) => "script_timeout",
            Self::InvalidOutput { .. } => "script_invalid_json",
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Execution { stderr, .. } | Self::InvalidOutput { stderr, .. } => {
                stderr.as_deref()
            }
            Self::Timeout(_) => None,
        }
    }
}

/// Run skill source with `interpreter -I -c`, feeding `payload` as JSON on
/// stdin and parsing stdout as JSON.
pub async fn run_script(
    interpreter: &str,
    code: &str,
    payload: &serde_json::Value,
    timeout: Duration,
    skill_id: &str,
    task_id: &str,
) -> Result<serde_json::Value, ScriptError> {
    let started_at = std::time::Instant::now();
    tracing::info!(
        skill_id = %skill_id,
        task_id = %task_id,
        interpreter = %interpreter,
        timeout_ms = timeout.as_millis(),
        "skill_script_started"
    );

    let stdin_payload = serde_json::to_vec(payload).map_err(|err| {
        ScriptError::execution(format!("failed to encode script input payload: {err}"))
    })?;

    let mut child = TokioCommand::new(interpreter)
        .arg("-I")
        .arg("-c")
        .arg(code)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            ScriptError::execution(format!(
                "failed to start {interpreter} for skill '{skill_id}': {err}"
            ))
        })?;

    let mut stdin = child.stdin.take().ok_or_else(|| {
        ScriptError::execution(format!("script stdin is unavailable for '{skill_id}'"))
    })?;
    let mut stdout = child.stdout.take().ok_or_else(|| {
        ScriptError::execution(format!("script stdout is unavailable for '{skill_id}'"))
    })?;
    let mut stderr = child.stderr.take().ok_or_else(|| {
        ScriptError::execution(format!("script stderr is unavailable for '{skill_id}'"))
    })?;

    let stdout_task = tokio::spawn(async move {
        let mut buffer = Vec::new();
        stdout.read_to_end(&mut buffer).await.map(|_| buffer)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buffer = Vec::new();
        stderr.read_to_end(&mut buffer).await.map(|_| buffer)
    });
    // Written concurrently so a script that never drains stdin still hits
    // the timeout instead of blocking the write.
    let stdin_task = tokio::spawn(async move {
        let written = stdin.write_all(&stdin_payload).await;
        drop(stdin);
        written
    });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(result) => result.map_err(|err| {
            ScriptError::execution(format!("failed waiting for skill '{skill_id}': {err}"))
        })?,
        Err(_) => {
            stdin_task.abort();
            let _ = child.kill().await;
            let _ = child.wait().await;
            return Err(ScriptError::Timeout(format!(
                "skill '{skill_id}' exceeded timeout of {}ms",
                timeout.as_millis()
            )));
        }
    };

    match stdin_task.await {
        Ok(Ok(())) => {}
        // The script exited without reading all of its input.
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::BrokenPipe => {}
        Ok(Err(err)) => {
            return Err(ScriptError::execution(format!(
                "failed to write input to skill '{skill_id}': {err}"
            )));
        }
        Err(err) => {
            return Err(ScriptError::execution(format!(
                "failed joining stdin writer for '{skill_id}': {err}"
            )));
        }
    }

    let stdout_bytes = stdout_task
        .await
        .map_err(|err| {
            ScriptError::execution(format!(
                "failed joining stdout reader for '{skill_id}': {err}"
            ))
        })?
        .map_err(|err| {
            ScriptError::execution(format!("failed reading stdout of '{skill_id}': {err}"))
        })?;
    let stderr_bytes = stderr_task
        .await
        .map_err(|err| {
            ScriptError::execution(format!(
                "failed joining stderr reader for '{skill_id}': {err}"
            ))
        })?
        .map_err(|err| {
            ScriptError::execution(format!("failed reading stderr of '{skill_id}': {err}"))
        })?;

    let stderr = String::from_utf8_lossy(&stderr_bytes).trim().to_string();
    if !status.success() {
        return Err(ScriptError::Execution {
            message: format!("skill '{skill_id}' exited with status {status}"),
            stderr: Some(stderr),
        });
    }

    let stdout = String::from_utf8(stdout_bytes).map_err(|err| ScriptError::InvalidOutput {
        message: format!("skill '{skill_id}' emitted non-utf8 stdout: {err}"),
        stderr: Some(stderr.clone()),
    })?;
    let parsed = serde_json::from_str::<serde_json::Value>(stdout.trim()).map_err(|err| {
        ScriptError::InvalidOutput {
            message: format!("skill '{skill_id}' emitted invalid JSON: {err}"),
            stderr: Some(stderr.clone()),
        }
    })?;

    tracing::info!(
        skill_id = %skill_id,
        task_id = %task_id,
        duration_ms = started_at.elapsed().as_millis(),
        status = %status,
        stdout_bytes = stdout.len(),
        stderr_bytes = stderr.len(),
        "skill_script_finished"
    );

    Ok(parsed)
}

use chromiumoxide::Page;
use std::error::Error;
use std::future::Future;
use std::time::Duration;

/// The in-page agent. Injected lazily and re-injected after navigation
/// tears the script context down.
const AGENT_JS: &str = include_str!("dom_agent.js");

/// Default timeout for JavaScript evaluation (10 seconds).
/// This prevents hanging when dialogs (alert/confirm/prompt) block the JS thread.
const EVAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum retries for context errors during page navigation.
const MAX_CONTEXT_RETRIES: u32 = 10;

/// Delay between retries when context is not found (page navigating).
const CONTEXT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Check if an error indicates the page context is unavailable (e.g., during navigation).
pub fn is_context_error(err: &str) -> bool {
    err.contains("Cannot find context")
        || err.contains("Execution context was destroyed")
        || err.contains("-32000")
}

/// Retry an async operation that may fail due to context errors during page navigation.
/// Returns immediately on success or non-context errors; retries only on context errors.
async fn retry_on_context_error<T, E, F, Fut>(
    operation_name: &str,
    mut operation: F,
) -> Result<T, Box<dyn Error + Send + Sync>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;

    for attempt in 0..MAX_CONTEXT_RETRIES {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let err_str = e.to_string();
                if is_context_error(&err_str) {
                    tracing::debug!(
                        "{} context error (attempt {}/{}), retrying...",
                        operation_name,
                        attempt + 1,
                        MAX_CONTEXT_RETRIES
                    );
                    last_error = Some(err_str);
                    tokio::time::sleep(CONTEXT_RETRY_DELAY).await;
                    continue;
                }
                return Err(err_str.into());
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| format!("{} failed after retries", operation_name))
        .into())
}

pub async fn inject_agent(page: &Page) -> Result<(), Box<dyn Error + Send + Sync>> {
    retry_on_context_error("Agent injection", || try_inject_agent(page)).await
}

async fn try_inject_agent(page: &Page) -> Result<(), Box<dyn Error + Send + Sync>> {
    let is_loaded: bool = page
        .evaluate("typeof window.MarqAgent !== 'undefined'")
        .await
        .map_err(|e| format!("Failed to check agent status: {}", e))?
        .into_value()
        .map_err(|e| format!("Failed to get bool value: {}", e))?;

    if !is_loaded {
        page.evaluate(AGENT_JS)
            .await
            .map_err(|e| format!("Failed to inject page agent: {}", e))?;
    }

    Ok(())
}

/// Run one agent command and unwrap its `{ok, data|error}` envelope.
pub async fn execute(
    page: &Page,
    params: serde_json::Value,
) -> Result<serde_json::Value, Box<dyn Error + Send + Sync>> {
    let params_json = serde_json::to_string(&params)?;
    let expression = format!("window.MarqAgent.process({})", params_json);

    let mut last_error = None;

    for attempt in 0..MAX_CONTEXT_RETRIES {
        inject_agent(page).await?;

        match evaluate_with_timeout(page, &expression).await {
            Ok(value) => return unwrap_envelope(value),
            Err(EvalError::Timeout) => {
                return Err(
                    "Command timed out - possibly blocked by a dialog (alert/confirm/prompt)"
                        .into(),
                );
            }
            Err(EvalError::Context(err_str)) => {
                tracing::debug!(
                    "Context error during command (attempt {}/{}), retrying...",
                    attempt + 1,
                    MAX_CONTEXT_RETRIES
                );
                last_error = Some(err_str);
                tokio::time::sleep(CONTEXT_RETRY_DELAY).await;
            }
            Err(EvalError::Other(err_str)) => {
                return Err(format!("Evaluation failed: {}", err_str).into());
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| "Failed to execute command after retries".to_string())
        .into())
}

fn unwrap_envelope(
    value: serde_json::Value,
) -> Result<serde_json::Value, Box<dyn Error + Send + Sync>> {
    let ok = value
        .get("ok")
        .and_then(|v| v.as_bool())
        .ok_or("Agent response missing 'ok' field")?;
    if ok {
        Ok(value.get("data").cloned().unwrap_or(serde_json::Value::Null))
    } else {
        let error = value
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown agent error");
        Err(error.to_string().into())
    }
}

enum EvalError {
    Timeout,
    Context(String),
    Other(String),
}

async fn evaluate_with_timeout(
    page: &Page,
    expression: &str,
) -> Result<serde_json::Value, EvalError> {
    let eval_result = tokio::time::timeout(EVAL_TIMEOUT, page.evaluate(expression)).await;

    match eval_result {
        Err(_) => Err(EvalError::Timeout),
        Ok(Err(e)) => {
            let err_str = e.to_string();
            if is_context_error(&err_str) {
                Err(EvalError::Context(err_str))
            } else {
                Err(EvalError::Other(err_str))
            }
        }
        Ok(Ok(remote_object)) => remote_object
            .into_value::<serde_json::Value>()
            .map_err(|e| EvalError::Other(format!("Failed to get result: {}", e))),
    }
}

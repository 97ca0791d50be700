use log::{error, warn};

/// Structured sink for warnings and errors raised while aggregating.
///
/// Context is a list of `(key, value)` pairs such as the request id and
/// provider id. Injected so hosts can route these events elsewhere.
pub trait Logger: Send + Sync {
    fn warn(&self, message: &str, context: &[(&str, String)]);
    fn error(&self, message: &str, context: &[(&str, String)]);
}

/// Default logger: forwards to the `log` facade under the `portify` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacade;

impl Logger for LogFacade {
    fn warn(&self, message: &str, context: &[(&str, String)]) {
        warn!(target: "portify", "{message}{}", render(context));
    }

    fn error(&self, message: &str, context: &[(&str, String)]) {
        error!(target: "portify", "{message}{}", render(context));
    }
}

/// ` key=value key=value`, or empty.
pub fn render(context: &[(&str, String)]) -> String {
    context
        .iter()
        .map(|(k, v)| format!(" {k}={v}"))
        .collect()
}

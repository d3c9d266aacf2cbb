//! Status bar and diagnostics

use webdash_hal::{Console, HalError, OutputStream};
use webdash_ipc::js::describe_error;

use crate::util::{error, log};

/// Console backed by the page's status element and `console.*`.
pub struct WebConsole {
    document: web_sys::Document,
    status_selector: String,
}

impl WebConsole {
    pub fn new(document: web_sys::Document, status_selector: impl Into<String>) -> Self {
        Self {
            document,
            status_selector: status_selector.into(),
        }
    }

    fn append_status_line(&self, stream: OutputStream, text: &str) -> Option<()> {
        // Looked up per line; the app may render the element after boot.
        let status = self.document.query_selector(&self.status_selector).ok()??;
        let line = self.document.create_element("div").ok()?;
        line.set_class_name(stream.class_name());
        line.set_text_content(Some(text));
        status.append_child(&line).ok()?;
        Some(())
    }
}

impl Console for WebConsole {
    fn show_status(&self, stream: OutputStream, text: &str) -> bool {
        self.append_status_line(stream, text).is_some()
    }

    fn debug_write(&self, msg: &str) {
        log(msg);
    }

    fn error_write(&self, msg: &str) {
        error(msg);
    }

    fn eval_script(&self, code: &str) -> Result<(), HalError> {
        js_sys::eval(code)
            .map(|_| ())
            .map_err(|e| HalError::DomError(describe_error(&e)))
    }
}

//! DOM injection

use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Element, HtmlScriptElement, Window};
use webdash_hal::{Document, HalError, InlineScript};

use crate::util::dom_error;

/// The live page document.
pub struct WebDocument {
    window: Window,
    document: web_sys::Document,
}

impl WebDocument {
    pub fn new(window: Window, document: web_sys::Document) -> Self {
        Self { window, document }
    }

    fn body(&self) -> Result<web_sys::HtmlElement, HalError> {
        self.document
            .body()
            .ok_or_else(|| HalError::ElementNotFound("body".to_string()))
    }

    fn create_script(&self) -> Result<HtmlScriptElement, HalError> {
        self.document
            .create_element("script")
            .map_err(dom_error)?
            .dyn_into::<HtmlScriptElement>()
            .map_err(|_| HalError::DomError("<script> is not an HTMLScriptElement".to_string()))
    }
}

impl Document for WebDocument {
    type Element = Element;

    fn location_pathname(&self) -> String {
        self.window
            .location()
            .pathname()
            .unwrap_or_else(|_| "/".to_string())
    }

    fn set_head_html(&self, html: &str) -> Result<(), HalError> {
        let head = self
            .document
            .head()
            .ok_or_else(|| HalError::ElementNotFound("head".to_string()))?;
        head.set_inner_html(html);
        Ok(())
    }

    fn set_body_html(&self, html: &str) -> Result<(), HalError> {
        self.body()?.set_inner_html(html);
        Ok(())
    }

    fn append_container(&self, tag: &str, html: &str) -> Result<Element, HalError> {
        let container = self.document.create_element(tag).map_err(dom_error)?;
        container.set_inner_html(html);
        self.body()?.append_child(&container).map_err(dom_error)?;
        Ok(container)
    }

    async fn append_external_script(&self, parent: &Element, src: &str) -> Result<(), HalError> {
        let script = self.create_script()?;
        let loaded = js_sys::Promise::new(&mut |resolve, reject| {
            script.set_onload(Some(&resolve));
            script.set_onerror(Some(&reject));
        });
        script.set_src(src);
        parent.append_child(&script).map_err(dom_error)?;

        JsFuture::from(loaded)
            .await
            .map(|_| ())
            .map_err(|_| HalError::ScriptLoadFailed(src.to_string()))
    }

    fn append_inline_script(
        &self,
        parent: &Element,
        script: InlineScript<'_>,
    ) -> Result<(), HalError> {
        let element = self.create_script()?;
        element.set_type(script.script_type);
        if let Some(id) = script.id {
            element.set_id(id);
        }
        element.set_text(script.code).map_err(dom_error)?;
        parent.append_child(&element).map_err(dom_error)?;
        Ok(())
    }
}

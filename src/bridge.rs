//! Script bridge for embedded web views
//!
//! Registering a view injects [`BRIDGE_SCRIPT`], which gives page script
//!
//! ```js
//! approov.fetchApproovToken("onToken", "onTokenFailure");
//! ```
//!
//! The shim posts a JSON message to the host's [`MESSAGE_HANDLER`] channel;
//! the host forwards it to
//! [`AttestationSession::handle_script_message`](crate::AttestationSession::handle_script_message).
//! When the fetch completes, `onToken("<token>")` or `onTokenFailure()` is
//! evaluated in the page.
//!
//! The registry only holds weak references to script contexts; it never keeps
//! a view alive.

use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::attestation::Token;
use crate::error::{Error, Result};

/// Name of the host message channel the bridge script posts to
pub const MESSAGE_HANDLER: &str = "approov";

/// Script method name exposed to pages
pub const FETCH_METHOD: &str = "fetchApproovToken";

/// Script injected into a page on registration
pub const BRIDGE_SCRIPT: &str = r#"(function () {
  var approov = window.approov = window.approov || {};
  approov.fetchApproovToken = function (success, failure) {
    window.webkit.messageHandlers.approov.postMessage(
      JSON.stringify({ method: "fetchApproovToken", args: [success, failure] }));
  };
})();"#;

/// Stable identity of a registered web view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewHandle(u64);

impl ViewHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl From<u64> for ViewHandle {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A page's script execution context
pub trait ScriptContext: Send + Sync {
    /// Evaluate `script` in the page's main frame
    fn evaluate(&self, script: &str);
}

/// A parsed `fetchApproovToken(success, failure)` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeCall {
    pub success_callback: String,
    pub failure_callback: String,
}

#[derive(Deserialize)]
struct ScriptMessage {
    method: String,
    #[serde(default)]
    args: Vec<String>,
}

impl BridgeCall {
    pub fn new(success_callback: impl Into<String>, failure_callback: impl Into<String>) -> Result<Self> {
        let call = Self {
            success_callback: success_callback.into(),
            failure_callback: failure_callback.into(),
        };
        for name in [&call.success_callback, &call.failure_callback] {
            if !is_callback_name(name) {
                return Err(Error::Bridge(format!(
                    "{:?} is not a script function name",
                    name
                )));
            }
        }
        Ok(call)
    }

    /// Parse a message posted by [`BRIDGE_SCRIPT`]
    pub fn parse(message: &str) -> Result<Self> {
        let message: ScriptMessage = serde_json::from_str(message)?;
        if message.method != FETCH_METHOD {
            return Err(Error::Bridge(format!(
                "unsupported bridge method {:?}",
                message.method
            )));
        }
        match message.args.as_slice() {
            [success, failure] => Self::new(success.as_str(), failure.as_str()),
            args => Err(Error::Bridge(format!(
                "{} expects 2 arguments, got {}",
                FETCH_METHOD,
                args.len()
            ))),
        }
    }

    /// Script that reports `token` back to the page
    pub fn completion_script(&self, token: &Token) -> String {
        if token.is_success() {
            // A JSON string literal is a valid script string literal
            let literal = serde_json::Value::String(token.value.clone()).to_string();
            format!("{}({});", self.success_callback, literal)
        } else {
            format!("{}();", self.failure_callback)
        }
    }
}

/// Identifier or dotted path of identifiers, e.g. `app.onToken`
fn is_callback_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        })
}

/// Registry of views with the bridge attached
#[derive(Clone, Default)]
pub struct WebBridge {
    views: Arc<Mutex<HashMap<ViewHandle, Weak<dyn ScriptContext>>>>,
}

impl WebBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the bridge to `view`
    ///
    /// Returns `false` without touching the page if the view is already
    /// registered.
    pub fn register(&self, view: ViewHandle, context: &Arc<dyn ScriptContext>) -> bool {
        {
            let mut views = self.views.lock();
            if views.get(&view).is_some_and(|weak| weak.strong_count() > 0) {
                return false;
            }
            views.insert(view, Arc::downgrade(context));
        }
        context.evaluate(BRIDGE_SCRIPT);
        debug!(?view, "web view registered");
        true
    }

    /// Detach the bridge; unknown handles are ignored
    pub fn unregister(&self, view: ViewHandle) {
        if self.views.lock().remove(&view).is_some() {
            debug!(?view, "web view unregistered");
        }
    }

    pub fn is_registered(&self, view: ViewHandle) -> bool {
        self.context(view).is_some()
    }

    /// Live script context for `view`, pruning it if the page is gone
    fn context(&self, view: ViewHandle) -> Option<Arc<dyn ScriptContext>> {
        let mut views = self.views.lock();
        let context = views.get(&view)?.upgrade();
        if context.is_none() {
            views.remove(&view);
        }
        context
    }

    /// Deliver a finished fetch to the page
    ///
    /// Dropped if the view was unregistered while the fetch was in flight.
    pub fn complete(&self, view: ViewHandle, call: &BridgeCall, token: &Token) {
        match self.context(view) {
            Some(context) => context.evaluate(&call.completion_script(token)),
            None => debug!(?view, "web view gone before token fetch completed"),
        }
    }
}

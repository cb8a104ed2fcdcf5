//! Record-mode browser host.
//!
//! Launches a Chromium session with the listener script installed on
//! every new document, relays its payloads over a CDP binding, and
//! intercepts network traffic into the shared API-call log. This is
//! the real-browser implementation of the observation ports the
//! collector and detectors are written against.

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventLoadingFailed, EventRequestWillBeSent,
    EventResponseReceived, RequestId, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::calls::{CapturedApiCall, SharedApiLog};
use crate::detect::dom::{BoundingBox, DomStateInspector, NodeId, NodeSnapshot};
use crate::detect::mutations::{DomMutation, MutationKind};
use crate::events::listeners::DomEventPayload;
use crate::transform::steps::Viewport;

/// Name of the binding the injected script pushes payloads through.
const EMIT_BINDING: &str = "__flowReplayEmit";

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Error types for capture operations
#[derive(Debug)]
pub enum CaptureError {
    /// Browser process failed to launch
    Launch(String),
    /// A CDP command or event subscription failed
    Cdp(String),
    /// Payload decoding failed
    Serialization(serde_json::Error),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::Launch(msg) => write!(f, "Browser launch failed: {}", msg),
            CaptureError::Cdp(msg) => write!(f, "CDP error: {}", msg),
            CaptureError::Serialization(err) => write!(f, "Payload error: {}", err),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CaptureError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::Serialization(err)
    }
}

/// One message relayed from the page.
#[derive(Debug)]
pub enum CaptureMessage {
    Event(DomEventPayload),
    Mutation(DomMutation),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    channel: String,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutationPayload {
    kind: String,
    node: NodePayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct NodePayload {
    node: u64,
    tag_name: String,
    id: Option<String>,
    test_id: Option<String>,
    role: Option<String>,
    aria_label: Option<String>,
    class_names: Vec<String>,
    attributes: BTreeMap<String, String>,
    text_content: Option<String>,
}

impl NodePayload {
    fn into_snapshot(self) -> NodeSnapshot {
        NodeSnapshot {
            node: self.node,
            tag_name: self.tag_name,
            id: self.id.filter(|s| !s.is_empty()),
            test_id: self.test_id,
            role: self.role,
            aria_label: self.aria_label,
            class_names: self.class_names,
            attributes: self.attributes,
            text_content: self.text_content,
        }
    }
}

/// A recording browser session.
pub struct CaptureBrowser {
    browser: Browser,
    page: Page,
    viewport: Viewport,
    handler_task: JoinHandle<()>,
    relay_task: JoinHandle<()>,
    network_task: JoinHandle<()>,
}

impl CaptureBrowser {
    /// Launch a browser, install the listener script, start network
    /// interception, and navigate to the start URL. Relayed payloads
    /// arrive on the returned channel.
    pub async fn launch(
        start_url: &str,
        viewport: Viewport,
        headless: bool,
        api_log: SharedApiLog,
    ) -> CaptureResult<(Self, mpsc::Receiver<CaptureMessage>)> {
        let mut builder = BrowserConfig::builder().window_size(viewport.width, viewport.height);
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(CaptureError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| CaptureError::Launch(e.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "browser handler event error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| CaptureError::Cdp(e.to_string()))?;

        // Binding first, so the script installed below can reach it.
        page.execute(AddBindingParams::new(EMIT_BINDING))
            .await
            .map_err(|e| CaptureError::Cdp(e.to_string()))?;

        let binding_events = page
            .event_listener::<EventBindingCalled>()
            .await
            .map_err(|e| CaptureError::Cdp(e.to_string()))?;
        let (tx, rx) = mpsc::channel(256);
        let relay_task = tokio::spawn(relay_payloads(binding_events, tx));

        // The script must survive navigations; clicks that navigate
        // would otherwise be the last thing a document records.
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            RECORDING_SCRIPT,
        ))
        .await
        .map_err(|e| CaptureError::Cdp(e.to_string()))?;

        let network_task = observe_network(page.clone(), api_log).await?;

        page.goto(start_url)
            .await
            .map_err(|e| CaptureError::Cdp(e.to_string()))?;
        // Also install on the already-loaded document.
        page.evaluate(RECORDING_SCRIPT)
            .await
            .map_err(|e| CaptureError::Cdp(e.to_string()))?;

        Ok((
            Self {
                browser,
                page,
                viewport,
                handler_task,
                relay_task,
                network_task,
            },
            rx,
        ))
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Current page URL.
    pub async fn current_url(&self) -> CaptureResult<String> {
        let result = self
            .page
            .evaluate("window.location.href")
            .await
            .map_err(|e| CaptureError::Cdp(e.to_string()))?;
        Ok(result
            .value()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    /// Refresh live state for the given buffered nodes, producing the
    /// inspector the mutation tracker polls against.
    pub async fn node_states(&self, nodes: &[NodeId]) -> CaptureResult<DomStateInspector> {
        let ids = serde_json::to_string(nodes)?;
        let script = format!(
            "window.__flowReplayNodeStates ? window.__flowReplayNodeStates({ids}) : null"
        );
        let result = self
            .page
            .evaluate(script.as_str())
            .await
            .map_err(|e| CaptureError::Cdp(e.to_string()))?;

        let value = result.value().cloned().unwrap_or(serde_json::Value::Null);
        let viewport = value
            .get("viewport")
            .and_then(|v| v.as_array())
            .map(|v| {
                (
                    v.first().and_then(|x| x.as_f64()).unwrap_or(0.0),
                    v.get(1).and_then(|x| x.as_f64()).unwrap_or(0.0),
                )
            })
            .unwrap_or((self.viewport.width as f64, self.viewport.height as f64));

        let mut inspector = DomStateInspector::new(viewport.0, viewport.1);
        if let Some(states) = value.get("states").and_then(|v| v.as_array()) {
            for state in states {
                let Some(parts) = state.as_array() else {
                    continue;
                };
                let Some(id) = parts.first().and_then(|v| v.as_u64()) else {
                    continue;
                };
                let connected = parts.get(1).and_then(|v| v.as_bool()).unwrap_or(false);
                if !connected {
                    inspector = inspector.disconnected(id);
                    continue;
                }
                match parts.get(2).and_then(|v| v.as_array()) {
                    Some(rect) if rect.len() == 4 => {
                        let read = |i: usize| rect[i].as_f64().unwrap_or(0.0);
                        inspector = inspector
                            .connected(id, BoundingBox::new(read(0), read(1), read(2), read(3)));
                    }
                    _ => inspector = inspector.connected_hidden(id),
                }
            }
        }
        Ok(inspector)
    }

    /// Close the browser and stop all relay tasks.
    pub async fn close(mut self) -> CaptureResult<()> {
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "browser close failed");
        }
        self.relay_task.abort();
        self.network_task.abort();
        self.handler_task.abort();
        Ok(())
    }
}

/// Decode binding payloads into capture messages.
async fn relay_payloads(
    mut events: chromiumoxide::listeners::EventStream<EventBindingCalled>,
    tx: mpsc::Sender<CaptureMessage>,
) {
    while let Some(event) = events.next().await {
        if event.name != EMIT_BINDING {
            continue;
        }
        let envelope: Envelope = match serde_json::from_str(&event.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(error = %err, "dropping undecodable capture payload");
                continue;
            }
        };
        let message = match envelope.channel.as_str() {
            "event" => match serde_json::from_value::<DomEventPayload>(envelope.payload) {
                Ok(payload) => CaptureMessage::Event(payload),
                Err(err) => {
                    debug!(error = %err, "dropping undecodable event payload");
                    continue;
                }
            },
            "mutation" => match serde_json::from_value::<MutationPayload>(envelope.payload) {
                Ok(payload) => {
                    let kind = match payload.kind.as_str() {
                        "added" => MutationKind::Added,
                        "textChanged" => MutationKind::TextChanged,
                        other => {
                            debug!(kind = other, "dropping unknown mutation kind");
                            continue;
                        }
                    };
                    CaptureMessage::Mutation(DomMutation {
                        kind,
                        node: payload.node.into_snapshot(),
                    })
                }
                Err(err) => {
                    debug!(error = %err, "dropping undecodable mutation payload");
                    continue;
                }
            },
            other => {
                debug!(channel = other, "dropping unknown capture channel");
                continue;
            }
        };
        if tx.send(message).await.is_err() {
            break;
        }
    }
    debug!("capture relay stream ended");
}

/// Enable network interception on a page and feed exchanges into the
/// shared log. Also used on playback sessions, where the log is the
/// `assertApi` observer.
pub async fn observe_network(
    page: Page,
    api_log: SharedApiLog,
) -> CaptureResult<JoinHandle<()>> {
    page.execute(NetworkEnableParams::default())
        .await
        .map_err(|e| CaptureError::Cdp(e.to_string()))?;
    Ok(tokio::spawn(intercept_network(page, api_log)))
}

/// Feed XHR/fetch exchanges into the shared API-call log.
async fn intercept_network(page: Page, api_log: SharedApiLog) {
    let mut requests = match page.event_listener::<EventRequestWillBeSent>().await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "network request interception unavailable");
            return;
        }
    };
    let mut responses = match page.event_listener::<EventResponseReceived>().await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "network response interception unavailable");
            return;
        }
    };
    let mut failures = match page.event_listener::<EventLoadingFailed>().await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "network failure interception unavailable");
            return;
        }
    };

    let mut url_by_request: HashMap<RequestId, String> = HashMap::new();

    loop {
        tokio::select! {
            request = requests.next() => {
                let Some(request) = request else { break };
                if !is_api_resource(request.r#type.as_ref()) {
                    continue;
                }
                let url = request.request.url.clone();
                url_by_request.insert(request.request_id.clone(), url.clone());
                let now = chrono::Utc::now().timestamp_millis();
                if let Ok(mut log) = api_log.lock() {
                    log.record(CapturedApiCall::pending(
                        url,
                        request.request.method.clone(),
                        now,
                    ));
                }
            }
            response = responses.next() => {
                let Some(response) = response else { break };
                let Some(url) = url_by_request.get(&response.request_id) else {
                    continue;
                };
                let now = chrono::Utc::now().timestamp_millis();
                if let Ok(mut log) = api_log.lock() {
                    log.complete_at(url, response.response.status as u16, now);
                }
            }
            failure = failures.next() => {
                let Some(failure) = failure else { break };
                let Some(url) = url_by_request.remove(&failure.request_id) else {
                    continue;
                };
                if let Ok(mut log) = api_log.lock() {
                    log.fail(&url, failure.error_text.clone());
                }
            }
        }
    }
    debug!("network interception stream ended");
}

fn is_api_resource(resource_type: Option<&ResourceType>) -> bool {
    matches!(
        resource_type,
        Some(ResourceType::Xhr) | Some(ResourceType::Fetch) | None
    )
}

/// Listener script installed on every document.
///
/// Emits `{channel, payload}` envelopes through the CDP binding:
/// listener payloads on `event`, observed subtree changes on
/// `mutation`. Keeps a node registry so the host can refresh live
/// element state (`__flowReplayNodeStates`) before each stability poll.
const RECORDING_SCRIPT: &str = r#"
(() => {
    if (window.__flowReplayInstalled) return true;
    window.__flowReplayInstalled = true;

    const registry = new Map();
    const byId = new Map();
    let nextNode = 1;
    function assign(el) {
        let id = registry.get(el);
        if (!id) {
            id = nextNode++;
            registry.set(el, id);
            byId.set(id, new WeakRef(el));
        }
        return id;
    }

    const ATTRS = ['name', 'type', 'placeholder', 'href', 'alt', 'title', 'value'];
    function attributesOf(el, extra) {
        const attrs = {};
        for (const name of ATTRS.concat(extra || [])) {
            const value = el.getAttribute(name);
            if (value !== null) attrs[name] = value;
        }
        return attrs;
    }
    function classesOf(el) {
        return typeof el.className === 'string'
            ? el.className.split(/\s+/).filter(Boolean)
            : [];
    }
    function xpathFor(el) {
        const parts = [];
        while (el && el.nodeType === 1) {
            let index = 1;
            let sibling = el.previousElementSibling;
            while (sibling) {
                if (sibling.tagName === el.tagName) index++;
                sibling = sibling.previousElementSibling;
            }
            parts.unshift(el.tagName.toLowerCase() + '[' + index + ']');
            el = el.parentElement;
        }
        return '//' + parts.join('/');
    }
    function describe(el, depth) {
        if (!el || el.nodeType !== 1) return null;
        depth = depth || 0;
        const parent = el.parentElement;
        const siblings = parent ? Array.from(parent.children) : [el];
        const text = (el.textContent || '').trim().slice(0, 200);
        return {
            tagName: el.tagName.toLowerCase(),
            id: el.id || null,
            testId: el.getAttribute('data-testid'),
            role: el.getAttribute('role'),
            ariaLabel: el.getAttribute('aria-label'),
            name: el.getAttribute('name'),
            textContent: text || null,
            classNames: classesOf(el),
            attributes: attributesOf(el),
            siblingIndex: Math.max(siblings.indexOf(el), 0),
            siblingCount: siblings.length,
            parent: depth < 5 && parent && parent !== document.documentElement
                ? describe(parent, depth + 1)
                : null,
            xpath: xpathFor(el)
        };
    }
    function describeNode(el) {
        return {
            node: assign(el),
            tagName: el.tagName.toLowerCase(),
            id: el.id || null,
            testId: el.getAttribute('data-testid'),
            role: el.getAttribute('role'),
            ariaLabel: el.getAttribute('aria-label'),
            classNames: classesOf(el),
            attributes: attributesOf(el, ['data-flow-replay-ignore']),
            textContent: (el.textContent || '').slice(0, 200) || null
        };
    }

    function emit(channel, payload) {
        if (typeof __flowReplayEmit === 'function') {
            __flowReplayEmit(JSON.stringify({ channel, payload }));
        }
    }
    function modifiersOf(e) {
        return { ctrl: !!e.ctrlKey, alt: !!e.altKey, shift: !!e.shiftKey, meta: !!e.metaKey };
    }
    function base(event) {
        return { event, timestamp: Date.now(), url: window.location.href };
    }

    for (const kind of ['click', 'dblclick']) {
        document.addEventListener(kind, (e) => {
            if (!e.target || e.target.nodeType !== 1) return;
            emit('event', Object.assign(base(kind), {
                target: describe(e.target),
                button: e.button,
                modifiers: modifiersOf(e)
            }));
        }, true);
    }

    const previousValues = new WeakMap();
    function isField(el) {
        return el && (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA' || el.tagName === 'SELECT');
    }
    function fieldPayload(el, event) {
        return Object.assign(base(event), {
            target: describe(el),
            value: String(el.value == null ? '' : el.value),
            previousValue: previousValues.get(el) || ''
        });
    }
    document.addEventListener('focusin', (e) => {
        if (isField(e.target)) previousValues.set(e.target, String(e.target.value || ''));
    }, true);
    document.addEventListener('input', (e) => {
        if (isField(e.target)) emit('event', fieldPayload(e.target, 'input'));
    }, true);
    document.addEventListener('change', (e) => {
        if (!isField(e.target)) return;
        emit('event', fieldPayload(e.target, 'change'));
        previousValues.set(e.target, String(e.target.value || ''));
    }, true);
    document.addEventListener('focusout', (e) => {
        if (!isField(e.target)) return;
        emit('event', fieldPayload(e.target, 'blur'));
        previousValues.set(e.target, String(e.target.value || ''));
    }, true);

    document.addEventListener('keydown', (e) => {
        if (!e.target || e.target.nodeType !== 1) return;
        emit('event', Object.assign(base('keydown'), {
            target: describe(e.target),
            key: e.key,
            modifiers: modifiersOf(e)
        }));
    }, true);

    let scrollTimer = null;
    window.addEventListener('scroll', () => {
        clearTimeout(scrollTimer);
        scrollTimer = setTimeout(() => {
            emit('event', Object.assign(base('scroll'), {
                target: describe(document.documentElement),
                scrollX: window.scrollX,
                scrollY: window.scrollY
            }));
        }, 250);
    }, true);

    function reportNavigation() {
        emit('event', Object.assign(base('navigation'), { to: window.location.href }));
    }
    window.addEventListener('popstate', reportNavigation);
    window.addEventListener('hashchange', reportNavigation);
    const pushState = history.pushState;
    history.pushState = function (...args) {
        const result = pushState.apply(this, args);
        reportNavigation();
        return result;
    };
    const replaceState = history.replaceState;
    history.replaceState = function (...args) {
        const result = replaceState.apply(this, args);
        reportNavigation();
        return result;
    };
    reportNavigation();

    const observer = new MutationObserver((records) => {
        for (const record of records) {
            if (record.type === 'childList') {
                for (const added of record.addedNodes) {
                    if (added.nodeType === 1) {
                        emit('mutation', { kind: 'added', node: describeNode(added) });
                    }
                }
            } else if (record.type === 'characterData') {
                const parent = record.target.parentElement;
                if (parent) {
                    emit('mutation', { kind: 'textChanged', node: describeNode(parent) });
                }
            }
        }
    });
    observer.observe(document.documentElement, {
        childList: true,
        characterData: true,
        subtree: true
    });

    window.__flowReplayNodeStates = function (ids) {
        const states = [];
        for (const id of ids) {
            const ref = byId.get(id);
            const el = ref && ref.deref();
            if (!el || !el.isConnected) {
                states.push([id, false, null]);
                continue;
            }
            const rect = el.getBoundingClientRect();
            states.push([id, true, [rect.x, rect.y, rect.width, rect.height]]);
        }
        return { viewport: [window.innerWidth, window.innerHeight], states };
    };

    return true;
})()
"#;

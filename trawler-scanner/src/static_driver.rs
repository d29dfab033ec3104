//! HTTP-only page driver.
//!
//! Fetches documents with reqwest and answers CSS queries with scraper. There
//! is no script engine: clicking a submit control serializes its form and
//! submits it, clicking a link follows it, anything else is a no-op. Typed
//! values and highlight outlines live alongside the fetched HTML and show up
//! in queries and snapshots.

use crate::driver::{DriverError, DriverResult, ElementRef, PageDriver, WaitPolicy};
use crate::normalize::normalize;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;
use url::Url;

pub const OUTLINE_STYLE: &str = "outline: 3px solid red";

const BLANK_URL: &str = "about:blank";

/// A form submission the driver performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSubmission {
    pub method: String,
    pub url: String,
    pub fields: Vec<(String, String)>,
}

enum Transport {
    Http(Client),
    /// Canned documents keyed by normalized URL.
    Fixtures(HashMap<String, String>),
}

enum Request {
    Get(Url),
    Post(Url, Vec<(String, String)>),
}

impl Request {
    fn url(&self) -> &Url {
        match self {
            Request::Get(url) | Request::Post(url, _) => url,
        }
    }
}

#[derive(Default)]
struct PageState {
    url: String,
    html: String,
    generation: u64,
    values: HashMap<Vec<usize>, String>,
    outlines: HashSet<Vec<usize>>,
}

pub struct StaticDriver {
    transport: Transport,
    state: Mutex<PageState>,
    submissions: Mutex<Vec<FormSubmission>>,
    navigations: watch::Sender<u64>,
    consumed: AtomicU64,
}

impl StaticDriver {
    pub fn new(timeout: Duration) -> DriverResult<Self> {
        let client = Client::builder()
            .user_agent("Trawler/0.1 (https://github.com/trapdoorsec/trawler)")
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| DriverError::Launch(format!("HTTP client: {}", e)))?;
        Ok(Self::with_transport(Transport::Http(client)))
    }

    /// Serve `pages` (URL, HTML) from memory instead of the network. POSTs
    /// resolve to the page at the action URL.
    pub fn from_fixtures<I, K, V>(pages: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let fixtures = pages
            .into_iter()
            .filter_map(|(url, html)| {
                normalize(url.as_ref(), url.as_ref()).map(|key| (key.to_string(), html.into()))
            })
            .collect();
        Self::with_transport(Transport::Fixtures(fixtures))
    }

    fn with_transport(transport: Transport) -> Self {
        let (navigations, _) = watch::channel(0);
        Self {
            transport,
            state: Mutex::new(PageState {
                url: BLANK_URL.to_string(),
                ..Default::default()
            }),
            submissions: Mutex::new(Vec::new()),
            navigations,
            consumed: AtomicU64::new(0),
        }
    }

    /// Every form submitted through a click, oldest first.
    pub fn submissions(&self) -> Vec<FormSubmission> {
        lock(&self.submissions).clone()
    }

    fn state(&self) -> MutexGuard<'_, PageState> {
        lock(&self.state)
    }

    async fn fetch(&self, request: Request) -> DriverResult<(String, String)> {
        match &self.transport {
            Transport::Http(client) => {
                let builder = match &request {
                    Request::Get(url) => client.get(url.clone()),
                    Request::Post(url, fields) => client.post(url.clone()).form(fields),
                };
                let response = builder
                    .send()
                    .await
                    .map_err(|e| DriverError::Navigation(format!("{}: {}", request.url(), e)))?;
                let final_url = response.url().to_string();
                let body = response
                    .text()
                    .await
                    .map_err(|e| DriverError::Navigation(format!("{}: {}", final_url, e)))?;
                Ok((final_url, body))
            }
            Transport::Fixtures(pages) => {
                let url = request.url();
                let mut without_query = url.clone();
                without_query.set_query(None);
                [url.as_str(), without_query.as_str()]
                    .iter()
                    .filter_map(|candidate| normalize(candidate, candidate))
                    .find_map(|key| pages.get(key.as_str()))
                    .map(|html| (url.to_string(), html.clone()))
                    .ok_or_else(|| DriverError::Navigation(format!("{}: not found", url)))
            }
        }
    }

    /// Load a response as the current document and bump the navigation
    /// counter.
    async fn load(&self, request: Request) -> DriverResult<u64> {
        let (url, html) = self.fetch(request).await?;
        {
            let mut state = self.state();
            state.url = url;
            state.html = html;
            state.generation += 1;
            state.values.clear();
            state.outlines.clear();
        }
        let mut seq = 0;
        self.navigations.send_modify(|n| {
            *n += 1;
            seq = *n;
        });
        Ok(seq)
    }

    /// Work out what a click on `element` should load, if anything.
    fn click_request(&self, element: &ElementRef) -> DriverResult<Option<Request>> {
        let state = self.state();
        let path = resolve_handle(&state, &element.handle)?;
        let document = Html::parse_document(&state.html);
        let target = element_at(&document, &path)
            .ok_or_else(|| DriverError::StaleElement(element.handle.clone()))?;
        let base = Url::parse(&state.url)
            .map_err(|_| DriverError::Interaction("no page loaded".to_string()))?;

        let tag = target.value().name();
        let kind = target
            .value()
            .attr("type")
            .map(str::to_ascii_lowercase);

        if tag == "a" {
            return Ok(target
                .value()
                .attr("href")
                .and_then(|href| base.join(href).ok())
                .filter(|url| matches!(url.scheme(), "http" | "https"))
                .map(|mut url| {
                    url.set_fragment(None);
                    Request::Get(url)
                }));
        }

        let is_submitter = match tag {
            "button" => kind.as_deref().is_none_or(|k| k == "submit"),
            "input" => matches!(kind.as_deref(), Some("submit") | Some("image")),
            _ => false,
        };
        if !is_submitter {
            return Ok(None);
        }

        let Some(form) = owning_form(&document, target) else {
            debug!("Submit control outside any form; nothing to submit");
            return Ok(None);
        };

        let mut fields = serialize_form(form, &state);
        if let Some(name) = target.value().attr("name").filter(|n| !n.is_empty()) {
            fields.push((
                name.to_string(),
                target.value().attr("value").unwrap_or_default().to_string(),
            ));
        }

        let action = target
            .value()
            .attr("formaction")
            .or_else(|| form.value().attr("action"))
            .filter(|a| !a.trim().is_empty());
        let mut action_url = match action {
            Some(action) => base
                .join(action)
                .map_err(|e| DriverError::Interaction(format!("bad form action: {}", e)))?,
            None => base.clone(),
        };
        action_url.set_fragment(None);

        let method = target
            .value()
            .attr("formmethod")
            .or_else(|| form.value().attr("method"))
            .unwrap_or("get")
            .to_ascii_lowercase();

        let submission = FormSubmission {
            method: method.clone(),
            url: action_url.to_string(),
            fields: fields.clone(),
        };
        debug!("Submitting form: {:?}", submission);
        lock(&self.submissions).push(submission);

        if method == "post" {
            Ok(Some(Request::Post(action_url, fields)))
        } else {
            if fields.is_empty() {
                action_url.set_query(None);
            } else {
                action_url.query_pairs_mut().clear().extend_pairs(&fields);
            }
            Ok(Some(Request::Get(action_url)))
        }
    }
}

#[async_trait]
impl PageDriver for StaticDriver {
    async fn goto(&self, url: &str, _wait: WaitPolicy) -> DriverResult<()> {
        let url = Url::parse(url).map_err(|e| DriverError::Navigation(format!("{}: {}", url, e)))?;
        let seq = self.load(Request::Get(url)).await?;
        self.consumed.store(seq, Ordering::SeqCst);
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.state().url.clone())
    }

    async fn query_all(
        &self,
        scope: Option<&ElementRef>,
        selector: &str,
    ) -> DriverResult<Vec<ElementRef>> {
        let selector = parse_selector(selector)?;
        let state = self.state();
        let document = Html::parse_document(&state.html);

        let found = match scope {
            Some(scope) => {
                let path = resolve_handle(&state, &scope.handle)?;
                let root = element_at(&document, &path)
                    .ok_or_else(|| DriverError::StaleElement(scope.handle.clone()))?;
                root.select(&selector)
                    .filter(|el| *el != root)
                    .map(|el| snapshot(el, &state))
                    .collect()
            }
            None => document
                .select(&selector)
                .map(|el| snapshot(el, &state))
                .collect(),
        };
        Ok(found)
    }

    async fn closest(
        &self,
        element: &ElementRef,
        selector: &str,
    ) -> DriverResult<Option<ElementRef>> {
        let selector = parse_selector(selector)?;
        let state = self.state();
        let path = resolve_handle(&state, &element.handle)?;
        let document = Html::parse_document(&state.html);
        let start = element_at(&document, &path)
            .ok_or_else(|| DriverError::StaleElement(element.handle.clone()))?;

        let found = std::iter::once(start)
            .chain(start.ancestors().filter_map(scraper::ElementRef::wrap))
            .find(|el| selector.matches(el))
            .map(|el| snapshot(el, &state));
        Ok(found)
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        let state = self.state();
        if state.url == BLANK_URL {
            return Err(DriverError::Screenshot("no page loaded".to_string()));
        }
        Ok(render_snapshot(&state).into_bytes())
    }

    async fn evaluate(&self, _script: &str, _target: Option<&ElementRef>) -> DriverResult<Value> {
        Err(DriverError::Unsupported("script evaluation"))
    }

    async fn click(&self, element: &ElementRef) -> DriverResult<()> {
        if let Some(request) = self.click_request(element)? {
            self.load(request).await?;
        }
        Ok(())
    }

    async fn clear_and_type(&self, element: &ElementRef, text: &str) -> DriverResult<()> {
        let mut state = self.state();
        let path = resolve_handle(&state, &element.handle)?;
        let document = Html::parse_document(&state.html);
        let target = element_at(&document, &path)
            .ok_or_else(|| DriverError::StaleElement(element.handle.clone()))?;
        match target.value().name() {
            "input" | "textarea" => {}
            other => {
                return Err(DriverError::Interaction(format!("cannot type into <{}>", other)));
            }
        }
        if target.value().attr("disabled").is_some() || target.value().attr("readonly").is_some() {
            return Err(DriverError::Interaction("field is not editable".to_string()));
        }
        state.values.insert(path, text.to_string());
        Ok(())
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> DriverResult<bool> {
        let mut rx = self.navigations.subscribe();
        let wait = async {
            loop {
                let current = *rx.borrow_and_update();
                if current > self.consumed.load(Ordering::SeqCst) {
                    self.consumed.store(current, Ordering::SeqCst);
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        Ok(tokio::time::timeout(timeout, wait).await.unwrap_or(false))
    }

    async fn highlight(&self, element: &ElementRef) -> DriverResult<()> {
        let mut state = self.state();
        let path = resolve_handle(&state, &element.handle)?;
        state.outlines.insert(path);
        Ok(())
    }

    async fn clear_highlight(&self, element: &ElementRef) -> DriverResult<()> {
        let mut state = self.state();
        let path = resolve_handle(&state, &element.handle)?;
        state.outlines.remove(&path);
        Ok(())
    }

    async fn scroll_to_bottom(&self) -> DriverResult<u64> {
        Err(DriverError::Unsupported("scrolling"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn parse_selector(selector: &str) -> DriverResult<Selector> {
    Selector::parse(selector).map_err(|_| DriverError::InvalidSelector(selector.to_string()))
}

fn encode_handle(generation: u64, path: &[usize]) -> String {
    let path: Vec<String> = path.iter().map(usize::to_string).collect();
    format!("{}:{}", generation, path.join("."))
}

/// Decode a handle issued for the current document.
fn resolve_handle(state: &PageState, handle: &str) -> DriverResult<Vec<usize>> {
    let stale = || DriverError::StaleElement(handle.to_string());
    let (generation, path) = handle.split_once(':').ok_or_else(stale)?;
    if generation.parse::<u64>().ok() != Some(state.generation) {
        return Err(stale());
    }
    path.split('.')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<usize>().map_err(|_| stale()))
        .collect()
}

fn path_of(element: &scraper::ElementRef<'_>) -> Vec<usize> {
    let mut path = Vec::new();
    let mut node = **element;
    while let Some(parent) = node.parent() {
        path.push(node.prev_siblings().count());
        node = parent;
    }
    path.reverse();
    path
}

fn element_at<'a>(document: &'a Html, path: &[usize]) -> Option<scraper::ElementRef<'a>> {
    let mut node = document.tree.root();
    for &index in path {
        node = node.children().nth(index)?;
    }
    scraper::ElementRef::wrap(node)
}

fn snapshot(element: scraper::ElementRef<'_>, state: &PageState) -> ElementRef {
    let path = path_of(&element);
    let tag = element.value().name().to_string();
    let mut attributes: BTreeMap<String, String> = element
        .value()
        .attrs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut text: String = element.text().collect();

    if let Some(value) = state.values.get(&path) {
        attributes.insert("value".to_string(), value.clone());
        if tag == "textarea" {
            text = value.clone();
        }
    }
    if state.outlines.contains(&path) {
        attributes.insert("style".to_string(), OUTLINE_STYLE.to_string());
    }

    ElementRef {
        handle: encode_handle(state.generation, &path),
        tag,
        attributes,
        text,
    }
}

fn owning_form<'a>(
    document: &'a Html,
    control: scraper::ElementRef<'a>,
) -> Option<scraper::ElementRef<'a>> {
    if let Some(form_id) = control.value().attr("form")
        && let Ok(selector) = Selector::parse(&format!("form[id=\"{}\"]", form_id))
    {
        return document.select(&selector).next();
    }
    control
        .ancestors()
        .filter_map(scraper::ElementRef::wrap)
        .find(|el| el.value().name() == "form")
}

/// Successful controls of `form` as (name, value) pairs in document order,
/// excluding submit buttons.
fn serialize_form(form: scraper::ElementRef<'_>, state: &PageState) -> Vec<(String, String)> {
    let Ok(controls) = Selector::parse("input, textarea, select") else {
        return Vec::new();
    };
    let mut fields = Vec::new();

    for control in form.select(&controls) {
        let el = control.value();
        let Some(name) = el.attr("name").filter(|n| !n.is_empty()) else {
            continue;
        };
        if el.attr("disabled").is_some() {
            continue;
        }
        let typed = state.values.get(&path_of(&control)).cloned();

        let value = match el.name() {
            "input" => {
                let kind = el.attr("type").unwrap_or("text").to_ascii_lowercase();
                match kind.as_str() {
                    "submit" | "button" | "reset" | "image" | "file" => continue,
                    "checkbox" | "radio" => {
                        if el.attr("checked").is_none() {
                            continue;
                        }
                        el.attr("value").unwrap_or("on").to_string()
                    }
                    _ => typed.unwrap_or_else(|| el.attr("value").unwrap_or_default().to_string()),
                }
            }
            "textarea" => typed.unwrap_or_else(|| control.text().collect()),
            _ => selected_option(control).unwrap_or_default(),
        };
        fields.push((name.to_string(), value));
    }
    fields
}

fn selected_option(select: scraper::ElementRef<'_>) -> Option<String> {
    let options = Selector::parse("option").ok()?;
    let mut all = select.select(&options);
    let chosen = select
        .select(&options)
        .find(|o| o.value().attr("selected").is_some())
        .or_else(|| all.next())?;
    Some(
        chosen
            .value()
            .attr("value")
            .map(str::to_string)
            .unwrap_or_else(|| chosen.text().collect::<String>().trim().to_string()),
    )
}

/// Current document plus a visible banner listing typed values and
/// outlined elements.
fn render_snapshot(state: &PageState) -> String {
    let document = Html::parse_document(&state.html);
    let mut rows = Vec::new();

    let mut typed: Vec<(&Vec<usize>, &String)> = state.values.iter().collect();
    typed.sort();
    for (path, value) in typed {
        if let Some(el) = element_at(&document, path) {
            let name = el
                .value()
                .attr("name")
                .or_else(|| el.value().attr("id"))
                .unwrap_or(el.value().name());
            rows.push(format!(
                "<li>{} = <code>{}</code></li>",
                escape(name),
                escape(value)
            ));
        }
    }

    let mut outlined: Vec<&Vec<usize>> = state.outlines.iter().collect();
    outlined.sort();
    for path in outlined {
        if let Some(el) = element_at(&document, path) {
            let text: String = el.text().collect::<Vec<_>>().join(" ");
            rows.push(format!(
                "<li style=\"{}\">highlighted &lt;{}&gt; {}</li>",
                OUTLINE_STYLE,
                el.value().name(),
                escape(text.trim())
            ));
        }
    }

    format!(
        "<div data-trawler-state=\"\"><p>{}</p><ul>{}</ul></div>\n{}",
        escape(&state.url),
        rows.join(""),
        state.html
    )
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

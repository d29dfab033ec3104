//! Linking loose buttons to the inputs they act on.
//!
//! Pages without forms still pair buttons with inputs through script. Three
//! heuristics, tried in order of decreasing confidence, recover the pairing;
//! the first that yields anything wins and the rest are not consulted.

use crate::driver::{DriverResult, ElementRef, PageDriver};
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub const CONTAINER_SELECTOR: &str = "div, section";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationTier {
    InlineHandler,
    DataTarget,
    Proximity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub tier: AssociationTier,
    pub inputs: Vec<ElementRef>,
}

impl Association {
    pub fn input_ids(&self) -> Vec<&str> {
        self.inputs.iter().filter_map(ElementRef::id).collect()
    }
}

/// DOM facts the heuristics read, gathered once per button.
#[derive(Debug, Clone, Default)]
pub struct AssociationContext {
    /// Every element carrying an id, keyed by it. First occurrence wins.
    pub elements_by_id: HashMap<String, ElementRef>,
    /// Inputs carrying a `data-target` attribute, in document order.
    pub data_target_inputs: Vec<ElementRef>,
    /// Identified inputs inside the button's nearest container.
    pub container_inputs: Vec<ElementRef>,
}

impl AssociationContext {
    pub async fn gather(driver: &dyn PageDriver, button: &ElementRef) -> DriverResult<Self> {
        let mut elements_by_id = HashMap::new();
        for element in driver.query_all(None, "[id]").await? {
            if let Some(id) = element.id().map(str::to_string) {
                elements_by_id.entry(id).or_insert(element);
            }
        }

        let data_target_inputs = driver.query_all(None, "input[data-target]").await?;

        let container_inputs = match driver.closest(button, CONTAINER_SELECTOR).await? {
            Some(container) => driver.query_all(Some(&container), "input[id]").await?,
            None => Vec::new(),
        };

        Ok(Self {
            elements_by_id,
            data_target_inputs,
            container_inputs,
        })
    }
}

pub type Heuristic = fn(&AssociationContext, &ElementRef) -> Option<Vec<ElementRef>>;

pub const HEURISTICS: [(AssociationTier, Heuristic); 3] = [
    (AssociationTier::InlineHandler, inline_handler_inputs),
    (AssociationTier::DataTarget, data_target_inputs),
    (AssociationTier::Proximity, proximity_inputs),
];

/// Run the heuristics in order and return the first non-empty result.
pub fn resolve(context: &AssociationContext, button: &ElementRef) -> Option<Association> {
    HEURISTICS.iter().find_map(|(tier, heuristic)| {
        heuristic(context, button)
            .filter(|inputs| !inputs.is_empty())
            .map(|inputs| {
                debug!("Associated {} input(s) via {:?}", inputs.len(), tier);
                Association { tier: *tier, inputs }
            })
    })
}

/// Gather context for `button` and resolve it.
pub async fn associate(
    driver: &dyn PageDriver,
    button: &ElementRef,
) -> DriverResult<Option<Association>> {
    let context = AssociationContext::gather(driver, button).await?;
    Ok(resolve(&context, button))
}

/// Quoted string literals in the button's `onclick` that name an existing
/// element. A leading `#` is accepted so selector-style references match.
pub fn inline_handler_inputs(
    context: &AssociationContext,
    button: &ElementRef,
) -> Option<Vec<ElementRef>> {
    let handler = button.attr("onclick")?;
    let mut seen = HashSet::new();
    let inputs: Vec<ElementRef> = quoted_literals(handler)
        .into_iter()
        .map(|literal| literal.trim_start_matches('#').to_string())
        .filter(|id| seen.insert(id.clone()))
        .filter_map(|id| context.elements_by_id.get(&id).cloned())
        .collect();
    Some(inputs)
}

/// Inputs declaring `data-target` equal to the button's id.
pub fn data_target_inputs(
    context: &AssociationContext,
    button: &ElementRef,
) -> Option<Vec<ElementRef>> {
    let button_id = button.id()?;
    Some(
        context
            .data_target_inputs
            .iter()
            .filter(|input| input.attr("data-target") == Some(button_id))
            .filter(|input| input.id().is_some())
            .cloned()
            .collect(),
    )
}

/// Identified inputs sharing the button's nearest block container.
pub fn proximity_inputs(
    context: &AssociationContext,
    _button: &ElementRef,
) -> Option<Vec<ElementRef>> {
    Some(
        context
            .container_inputs
            .iter()
            .filter(|input| input.id().is_some())
            .cloned()
            .collect(),
    )
}

/// Contents of every `'...'` or `"..."` run in `source`. Either quote kind
/// closes a literal and literals never contain quotes.
pub fn quoted_literals(source: &str) -> Vec<String> {
    let mut literals = Vec::new();
    let mut current: Option<String> = None;

    for c in source.chars() {
        if c != '\'' && c != '"' {
            if let Some(buf) = current.as_mut() {
                buf.push(c);
            }
            continue;
        }
        match current.take() {
            Some(buf) if !buf.is_empty() => literals.push(buf),
            // '' is not a literal; the second quote opens a new one
            _ => current = Some(String::new()),
        }
    }

    literals
}

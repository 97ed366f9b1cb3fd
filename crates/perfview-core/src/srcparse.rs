//! Query source selector parser.
//!
//! A selector names a source plus optional metric, aggregate and config
//! restrictions in one string:
//!
//! | Input                  | Source | Metric | Aggregate |
//! |------------------------|--------|--------|-----------|
//! | `src`                  | src    | *      | *         |
//! | `src:metric`           | src    | metric | *         |
//! | `src:*.aggregate`      | src    | *      | aggregate |
//! | `src:metric.aggregate` | src    | metric | aggregate |
//!
//! and the same forms with `$key1=value1$key2=value2...` appended. A config
//! segment without `=` carries an empty value. Wildcards parse to `None`.

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SrcSelector {
    pub source: String,
    pub metric: Option<String>,
    pub aggregate: Option<String>,
    pub configs: HashMap<String, String>,
}

pub fn parse(full_src: &str) -> SrcSelector {
    let mut selector = SrcSelector::default();

    let mut segments = full_src.split('$');
    let head = segments.next().unwrap_or_default();
    for kv in segments {
        let (key, value) = kv.split_once('=').unwrap_or((kv, ""));
        selector.configs.insert(key.to_string(), value.to_string());
    }

    let Some((source, rest)) = head.split_once(':') else {
        selector.source = head.to_string();
        return selector;
    };
    selector.source = source.to_string();

    match rest.split_once('.') {
        Some((metric, aggregate)) => {
            if metric != "*" && !metric.is_empty() {
                selector.metric = Some(metric.to_string());
            }
            if !aggregate.is_empty() {
                selector.aggregate = Some(aggregate.to_string());
            }
        }
        None => {
            if rest != "*" && !rest.is_empty() {
                selector.metric = Some(rest.to_string());
            }
        }
    }

    selector
}

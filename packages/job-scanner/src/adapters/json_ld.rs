//! schema.org `JobPosting` extraction from `<script type="application/ld+json">`.
//!
//! Most boards embed one for search engines, and it tends to survive layout
//! changes better than CSS selectors do.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use crate::dedup::clean_text;
use crate::types::JobCandidate;

lazy_static! {
    static ref LD_JSON: Selector =
        Selector::parse(r#"script[type="application/ld+json"]"#).expect("static selector");
    static ref BLOCK_BREAK: Regex =
        Regex::new(r"(?i)<\s*(br\s*/?|/p|/div|/li|/h[1-6]|/tr|/ul|/ol)\s*>").expect("static regex");
}

/// First `JobPosting` found in the document, as a candidate for `page_url`.
pub fn find_job_posting(document: &Html, page_url: &Url) -> Option<JobCandidate> {
    document
        .select(&LD_JSON)
        .filter_map(|script| {
            let raw = script.text().collect::<String>();
            serde_json::from_str::<Value>(raw.trim()).ok()
        })
        .find_map(|json| find_posting_node(&json).map(|node| to_candidate(node, page_url)))
}

fn find_posting_node(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_posting_node),
        Value::Object(map) => {
            if is_job_posting(value) {
                return Some(value);
            }
            map.get("@graph").and_then(find_posting_node)
        }
        _ => None,
    }
}

fn is_job_posting(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => t == "JobPosting",
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("JobPosting")),
        _ => false,
    }
}

fn to_candidate(node: &Value, page_url: &Url) -> JobCandidate {
    let external_url = node
        .get("url")
        .and_then(Value::as_str)
        .and_then(|u| page_url.join(u).ok())
        .unwrap_or_else(|| page_url.clone());

    JobCandidate {
        external_url: external_url.to_string(),
        title: string_field(node, "title"),
        company_name: node.get("hiringOrganization").and_then(organization_name),
        location: location(node),
        salary: node.get("baseSalary").and_then(salary),
        job_type: node.get("employmentType").and_then(employment_type),
        description: node
            .get("description")
            .and_then(Value::as_str)
            .map(html_to_text)
            .filter(|d| !d.is_empty()),
    }
}

fn string_field(node: &Value, key: &str) -> Option<String> {
    node.get(key)
        .and_then(Value::as_str)
        .map(clean_text)
        .filter(|s| !s.is_empty())
}

fn organization_name(org: &Value) -> Option<String> {
    let name = match org {
        Value::String(name) => Some(clean_text(name)),
        Value::Object(_) => string_field(org, "name"),
        _ => None,
    };
    name.filter(|s| !s.is_empty())
}

fn location(node: &Value) -> Option<String> {
    let places: Vec<String> = match node.get("jobLocation") {
        Some(Value::Array(items)) => items.iter().filter_map(place).collect(),
        Some(single) => place(single).into_iter().collect(),
        None => Vec::new(),
    };

    if !places.is_empty() {
        return Some(places.join("; "));
    }
    match node.get("jobLocationType").and_then(Value::as_str) {
        Some("TELECOMMUTE") => Some("Remote".to_string()),
        _ => None,
    }
}

fn place(value: &Value) -> Option<String> {
    let address = value.get("address").unwrap_or(value);
    if let Value::String(s) = address {
        return Some(clean_text(s)).filter(|s| !s.is_empty());
    }

    let country = match address.get("addressCountry") {
        Some(Value::Object(_)) => address.get("addressCountry").and_then(|c| string_field(c, "name")),
        _ => string_field(address, "addressCountry"),
    };
    let parts: Vec<String> = [
        string_field(address, "addressLocality"),
        string_field(address, "addressRegion"),
        country,
    ]
    .into_iter()
    .flatten()
    .collect();

    (!parts.is_empty()).then(|| parts.join(", "))
}

fn salary(base: &Value) -> Option<String> {
    let currency = base
        .get("currency")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let amount = base.get("value").unwrap_or(base);

    let number = |key: &str| amount.get(key).and_then(Value::as_f64).map(format_amount);
    let range = match (number("minValue"), number("maxValue"), number("value")) {
        (Some(min), Some(max), _) if min != max => format!("{min}-{max}"),
        (Some(v), _, _) | (None, Some(v), _) | (None, None, Some(v)) => v,
        _ => return amount.as_str().map(clean_text).filter(|s| !s.is_empty()),
    };

    let mut text = if currency.is_empty() {
        range
    } else {
        format!("{currency} {range}")
    };
    if let Some(unit) = amount.get("unitText").and_then(Value::as_str) {
        text.push_str(" / ");
        text.push_str(&unit.to_ascii_lowercase());
    }
    Some(text)
}

fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value:.2}")
    }
}

fn employment_type(value: &Value) -> Option<String> {
    let types: Vec<String> = match value {
        Value::String(s) => vec![humanize(s)],
        Value::Array(items) => items.iter().filter_map(Value::as_str).map(humanize).collect(),
        _ => Vec::new(),
    };
    (!types.is_empty()).then(|| types.join(", "))
}

/// `FULL_TIME` -> `Full time`
fn humanize(raw: &str) -> String {
    let lower = raw.trim().replace('_', " ").to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Flatten an HTML description into text, one line per block element.
pub fn html_to_text(html: &str) -> String {
    let with_breaks = BLOCK_BREAK.replace_all(html, "$0\n");
    let fragment = Html::parse_fragment(&with_breaks);
    let text = fragment.root_element().text().collect::<String>();
    text.lines()
        .map(clean_text)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_url() -> Url {
        Url::parse("https://boards.example.com/jobs/42").unwrap()
    }

    fn doc(json: &str) -> Html {
        Html::parse_document(&format!(
            r#"<html><head><script type="application/ld+json">{json}</script></head><body></body></html>"#
        ))
    }

    #[test]
    fn extracts_full_posting() {
        let html = doc(r#"{
            "@context": "https://schema.org",
            "@type": "JobPosting",
            "title": "Senior Rust Engineer",
            "hiringOrganization": { "@type": "Organization", "name": "Acme" },
            "jobLocation": { "@type": "Place", "address": {
                "addressLocality": "Berlin", "addressCountry": { "name": "DE" } } },
            "baseSalary": { "currency": "EUR", "value": {
                "minValue": 80000, "maxValue": 100000, "unitText": "YEAR" } },
            "employmentType": ["FULL_TIME", "CONTRACTOR"],
            "description": "<p>Build <b>things</b>.</p><ul><li>Rust</li></ul>"
        }"#);

        let job = find_job_posting(&html, &page_url()).unwrap();
        assert_eq!(job.external_url, "https://boards.example.com/jobs/42");
        assert_eq!(job.title.as_deref(), Some("Senior Rust Engineer"));
        assert_eq!(job.company_name.as_deref(), Some("Acme"));
        assert_eq!(job.location.as_deref(), Some("Berlin, DE"));
        assert_eq!(job.salary.as_deref(), Some("EUR 80000-100000 / year"));
        assert_eq!(job.job_type.as_deref(), Some("Full time, Contractor"));
        assert_eq!(job.description.as_deref(), Some("Build things.\nRust"));
    }

    #[test]
    fn finds_posting_inside_graph() {
        let html = doc(r#"{
            "@graph": [
                { "@type": "WebPage", "name": "Careers" },
                { "@type": ["JobPosting"], "title": "Designer",
                  "jobLocationType": "TELECOMMUTE" }
            ]
        }"#);

        let job = find_job_posting(&html, &page_url()).unwrap();
        assert_eq!(job.title.as_deref(), Some("Designer"));
        assert_eq!(job.location.as_deref(), Some("Remote"));
    }

    #[test]
    fn ignores_other_types_and_bad_json() {
        assert!(find_job_posting(&doc(r#"{"@type": "Organization"}"#), &page_url()).is_none());
        assert!(find_job_posting(&doc("{ not json"), &page_url()).is_none());
    }
}

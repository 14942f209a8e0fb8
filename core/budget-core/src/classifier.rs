//! Destination classification.
//!
//! The tracker only consumes `is_monitored(url)`. [`DomainClassifier`] is the
//! default implementation: a URL is monitored when its host equals one of the
//! configured domains or is a subdomain of one.

use url::Url;

pub trait Classifier {
    fn is_monitored(&self, url: &str) -> bool;
}

impl<F> Classifier for F
where
    F: Fn(&str) -> bool,
{
    fn is_monitored(&self, url: &str) -> bool {
        self(url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainClassifier {
    domains: Vec<String>,
}

impl DomainClassifier {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|domain| normalize_domain(domain.as_ref()))
            .filter(|domain| !domain.is_empty())
            .collect();
        DomainClassifier { domains }
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }
}

impl Classifier for DomainClassifier {
    fn is_monitored(&self, url: &str) -> bool {
        let Some(host) = url_host(url) else {
            return false;
        };
        self.domains.iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

/// Lowercased host of an absolute URL, without a trailing dot.
pub fn url_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.trim_end_matches('.');
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

fn normalize_domain(domain: &str) -> String {
    domain
        .trim()
        .trim_start_matches("*.")
        .trim_start_matches('.')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

use url::Url;

/// Schemes that never point at something downloadable.
const NON_FETCHABLE_SCHEMES: &[&str] = &["data:", "javascript:", "mailto:", "blob:", "about:", "tel:"];

/// Normalize user input into an absolute http(s) URL, defaulting to `https`.
pub fn normalize_target(raw: &str) -> Result<Url, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty url".to_string());
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed.trim_start_matches("//"))
    };
    let url = Url::parse(&candidate).map_err(|err| err.to_string())?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "http" | "https" => Err("missing host".to_string()),
        other => Err(format!("unsupported scheme {other}")),
    }
}

/// Resolve a document reference against `base`.
///
/// Returns `None` when the reference cannot name a fetchable resource: no
/// base, blank input, fragment-only, or a non-http scheme.
pub fn resolve_reference(reference: &str, base: Option<&Url>) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') {
        return None;
    }
    let lower = reference.to_ascii_lowercase();
    if NON_FETCHABLE_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
        return None;
    }
    let base = base?;

    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(reference.to_string());
    }

    let resolved = if reference.starts_with("//") {
        Url::parse(&format!("{}:{reference}", base.scheme())).ok()?
    } else if reference.starts_with('/') {
        base.join(reference).ok()?
    } else {
        let mut relative = reference;
        while let Some(rest) = relative.strip_prefix("./") {
            relative = rest;
        }
        base.join(relative).ok()?
    };

    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::normalize_target;

    #[test]
    fn scheme_defaults_to_https() {
        assert_eq!(
            normalize_target("example.com/page").unwrap().as_str(),
            "https://example.com/page"
        );
        assert_eq!(
            normalize_target(" http://example.com ").unwrap().as_str(),
            "http://example.com/"
        );
    }

    #[test]
    fn unusable_targets_are_rejected() {
        assert!(normalize_target("").is_err());
        assert!(normalize_target("ftp://example.com/file").is_err());
        assert!(normalize_target("https://").is_err());
    }
}

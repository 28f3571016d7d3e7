//! Repository URL helpers.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static REPO_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| match Regex::new(r"/([^/]+?)(\.git)?$") {
    Ok(regex) => regex,
    Err(err) => panic!("invalid repo name regex: {err}"),
});

/// Embeds a token into an http(s) clone URL.
///
/// `https://github.com/acme/app.git` becomes
/// `https://x-access-token:<token>@github.com/acme/app.git`. Other schemes and
/// unparseable URLs are returned unchanged.
pub fn authenticated_repo_url(repo_url: &str, token: Option<&str>) -> String {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return repo_url.to_string();
    };

    let Ok(mut url) = Url::parse(repo_url) else {
        return repo_url.to_string();
    };
    if !matches!(url.scheme(), "http" | "https") {
        return repo_url.to_string();
    }

    if url.set_username("x-access-token").is_err() || url.set_password(Some(token)).is_err() {
        return repo_url.to_string();
    }
    url.to_string()
}

/// Last path segment of a repository URL without `.git`.
pub fn repo_name(repo_url: &str) -> String {
    let trimmed = repo_url.trim_end_matches('/');
    REPO_NAME_REGEX
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| "project".to_string(), |m| m.as_str().to_string())
}

/// Whether a repository URL is something `git clone` can use.
pub fn is_valid_repo_url(repo_url: &str) -> bool {
    if repo_url.starts_with("git@") && repo_url.contains(':') {
        return true;
    }
    Url::parse(repo_url).is_ok_and(|url| url.has_host() || url.scheme() == "file")
}

/// Sandbox lifetime in minutes from a free-form timeout string like `"90"` or `"90m"`.
///
/// Missing or digit-free values fall back to `default_minutes`; the result is
/// clamped to `1..=max_minutes`.
pub fn timeout_minutes(timeout: Option<&str>, default_minutes: u32, max_minutes: u32) -> u32 {
    let digits: String = timeout
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();

    let minutes = if digits.is_empty() {
        default_minutes
    } else {
        // Only overflow can fail here; too many minutes means the maximum.
        digits.parse::<u32>().unwrap_or(u32::MAX)
    };
    minutes.clamp(1, max_minutes.max(1))
}

//! Coarse check for URLs the backend is willing to hand to yt-dlp.

use url::Url;

/// Host fragments accepted by [`is_supported_url`].
pub const SUPPORTED_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

/// Returns `true` when `candidate` parses as an absolute URL whose network
/// location (userinfo, host and port) contains one of [`SUPPORTED_HOSTS`].
///
/// This is a substring match, not an allow-list: `www.youtube.com`,
/// `m.youtube.com` and `youtube.com.example.org` all pass. Unparseable input
/// is rejected instead of surfacing a parse error.
pub fn is_supported_url(candidate: &str) -> bool {
    let Ok(parsed) = Url::parse(candidate.trim()) else {
        return false;
    };
    let location = network_location(&parsed);
    SUPPORTED_HOSTS
        .iter()
        .any(|fragment| location.contains(fragment))
}

fn network_location(url: &Url) -> String {
    let mut location = String::new();
    if !url.username().is_empty() {
        location.push_str(url.username());
        if let Some(password) = url.password() {
            location.push(':');
            location.push_str(password);
        }
        location.push('@');
    }
    if let Some(host) = url.host_str() {
        location.push_str(host);
    }
    if let Some(port) = url.port() {
        location.push(':');
        location.push_str(&port.to_string());
    }
    location
}

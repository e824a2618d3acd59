use url::Url;

/// Host (and port, if any) of a channel address.
pub fn domain_from_url(channel_url: &str) -> Option<String> {
    let url = Url::parse(channel_url).ok()?;
    let host = url.host_str()?;
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host.to_string()),
    }
}

/// Channel name taken from the first path segment, only for the platform's own host.
pub fn channel_slug(channel_url: &str, platform_host: &str) -> Option<String> {
    let url = Url::parse(channel_url).ok()?;
    let host = url.host_str()?;
    if !host.contains(platform_host) {
        return None;
    }
    url.path_segments()?
        .find(|segment| !segment.is_empty())
        .map(|segment| segment.to_string())
}

/// Channel status endpoint used by both the in-page fetch and the direct probe.
pub fn channel_api_url(channel_url: &str, platform_host: &str) -> Option<String> {
    let slug = channel_slug(channel_url, platform_host)?;
    Some(format!("https://{}/api/v2/channels/{}", platform_host, slug))
}

/// Short display name for status lines.
pub fn channel_display_name(channel_url: &str) -> &str {
    channel_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(channel_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_from_url() {
        assert_eq!(
            domain_from_url("https://kick.com/xqc").as_deref(),
            Some("kick.com")
        );
        assert_eq!(
            domain_from_url("http://localhost:8080/chan").as_deref(),
            Some("localhost:8080")
        );
        assert_eq!(domain_from_url("not a url"), None);
    }

    #[test]
    fn test_channel_slug_only_for_platform_host() {
        assert_eq!(
            channel_slug("https://kick.com/xqc/videos", "kick.com").as_deref(),
            Some("xqc")
        );
        assert_eq!(channel_slug("https://kick.com/", "kick.com"), None);
        assert_eq!(channel_slug("https://twitch.tv/xqc", "kick.com"), None);
    }

    #[test]
    fn test_channel_api_url() {
        assert_eq!(
            channel_api_url("https://www.kick.com/trainwreckstv", "kick.com").as_deref(),
            Some("https://kick.com/api/v2/channels/trainwreckstv")
        );
        assert_eq!(channel_display_name("https://kick.com/xqc/"), "xqc");
    }
}

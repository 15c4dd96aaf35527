//! HLS manifest rewriting
//!
//! Turns an upstream stream reference into a self-contained media playlist:
//! - Non-HLS resources pass through untouched
//! - Master playlists are reduced to their highest-bandwidth variant
//! - Relative segment, key and init-section URIs become absolute
//!
//! DRM and subtitle metadata from the descriptor travel alongside the
//! rewritten text unchanged.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::Response;
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::adapter::{DrmInfo, StreamDescriptor, Subtitle};
use crate::error::{Error, Result};
use crate::http::UpstreamClient;

/// First tag of every HLS playlist.
pub const HLS_MARKER: &str = "#EXTM3U";

/// Bytes needed before deciding whether a body is a playlist.
const SNIFF_LEN: usize = 64;

static SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").expect("valid scheme regex"));
static URI_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"URI="([^"]*)""#).expect("valid URI attribute regex"));

/// A variant stream declared in a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub bandwidth: u64,
    pub resolution: Option<String>,
    pub codecs: Option<String>,
    /// URI as written in the playlist (possibly relative).
    pub uri: String,
}

/// What a playback client receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Playback {
    /// Rewritten media playlist.
    Playlist {
        /// URL the media playlist was fetched from.
        url: String,
        body: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        drm: Option<DrmInfo>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        subtitles: Vec<Subtitle>,
    },
    /// Not an HLS playlist; the descriptor is returned as resolved.
    Direct(StreamDescriptor),
}

/// Fetches and rewrites HLS manifests.
pub struct ManifestRewriter {
    client: UpstreamClient,
}

impl ManifestRewriter {
    pub fn new(client: UpstreamClient) -> Self {
        Self { client }
    }

    /// Relative URIs are resolved against the URL each playlist was finally
    /// served from, after redirects.
    pub async fn rewrite(&self, descriptor: StreamDescriptor) -> Result<Playback> {
        let headers = &descriptor.headers;
        let Some((base_url, body)) = self.fetch_playlist(&descriptor.stream_url, headers).await?
        else {
            debug!("{} is not an HLS playlist", descriptor.stream_url);
            return Ok(Playback::Direct(descriptor));
        };
        let body = normalize_line_breaks(&body);

        let (media_url, media_body) = if is_master(&body) {
            let variants = parse_variants(&body);
            let best = select_best_variant(&variants).ok_or_else(|| {
                Error::upstream(format!("master playlist without variants: {base_url}"))
            })?;
            let url = resolve_uri(&base_url, &best.uri);
            info!(
                "Selected variant {} bps of {} from {base_url}",
                best.bandwidth,
                variants.len()
            );
            let resp = self.client.send(&url, headers).await?;
            let media_url = resp.url().to_string();
            let text = resp.text().await?;
            (media_url, normalize_line_breaks(&text))
        } else {
            (base_url, body)
        };

        Ok(Playback::Playlist {
            body: rewrite_media_playlist(&media_body, &media_url),
            url: media_url,
            drm: descriptor.drm,
            subtitles: descriptor.subtitles,
        })
    }

    /// Fetch `url` if it is an HLS playlist, returning the final URL and the
    /// body. Only the first bytes of other resources are read.
    async fn fetch_playlist(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Option<(String, String)>> {
        let mut resp = self.client.send(url, headers).await?;
        let final_url = resp.url().to_string();
        let mut buf = Vec::new();

        while buf.len() < SNIFF_LEN {
            match resp.chunk().await? {
                Some(chunk) => buf.extend_from_slice(&chunk),
                None => break,
            }
        }
        if !is_hls(&String::from_utf8_lossy(&buf)) {
            return Ok(None);
        }

        read_rest(&mut resp, &mut buf).await?;
        let body = String::from_utf8(buf)
            .map_err(|_| Error::upstream(format!("playlist at {final_url} is not valid UTF-8")))?;
        Ok(Some((final_url, body)))
    }
}

async fn read_rest(resp: &mut Response, buf: &mut Vec<u8>) -> Result<()> {
    while let Some(chunk) = resp.chunk().await? {
        buf.extend_from_slice(&chunk);
    }
    Ok(())
}

/// Whether `body` starts with the HLS marker (ignoring a BOM and leading
/// whitespace).
pub fn is_hls(body: &str) -> bool {
    body.trim_start_matches('\u{feff}')
        .trim_start()
        .starts_with(HLS_MARKER)
}

/// Master playlists list variant streams instead of segments.
pub fn is_master(body: &str) -> bool {
    body.contains("#EXT-X-STREAM-INF")
}

/// Unify line endings. Some upstreams separate entries with spaces instead
/// of newlines; such single-line bodies are split before every `#EXT` tag.
/// Text after `#EXTINF` or `#EXT-X-STREAM-INF` stays with the tag except for
/// its last token, which is the URI.
pub fn normalize_line_breaks(body: &str) -> String {
    let unified = body.replace("\r\n", "\n").replace('\r', "\n");
    if unified.trim().contains('\n') {
        return unified;
    }

    let mut lines = Vec::new();
    let mut group: Vec<&str> = Vec::new();
    for token in unified.split_whitespace() {
        if token.starts_with("#EXT") && !group.is_empty() {
            split_tag_group(&group, &mut lines);
            group.clear();
        }
        group.push(token);
    }
    split_tag_group(&group, &mut lines);
    lines.join("\n")
}

/// Lines for one tag and the tokens that followed it.
fn split_tag_group(group: &[&str], lines: &mut Vec<String>) {
    let Some(tag) = group.first() else {
        return;
    };
    let takes_uri = tag.starts_with("#EXTINF") || tag.starts_with("#EXT-X-STREAM-INF");

    match group.split_last() {
        Some((uri, head)) if takes_uri && !head.is_empty() => {
            lines.push(head.join(" "));
            lines.push((*uri).to_string());
        }
        _ => lines.extend(group.iter().map(|t| (*t).to_string())),
    }
}

/// Variants of a master playlist in declaration order.
pub fn parse_variants(body: &str) -> Vec<Variant> {
    let mut variants = Vec::new();
    let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());

    while let Some(line) = lines.next() {
        let Some(rest) = line.strip_prefix("#EXT-X-STREAM-INF:") else {
            continue;
        };
        let attrs = parse_attributes(rest);

        // The URI is the next non-tag line
        let Some(uri) = lines.by_ref().find(|l| !l.starts_with('#')) else {
            break;
        };

        variants.push(Variant {
            bandwidth: attrs
                .get("BANDWIDTH")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            resolution: attrs.get("RESOLUTION").cloned(),
            codecs: attrs.get("CODECS").cloned(),
            uri: uri.to_string(),
        });
    }

    variants
}

/// Highest bandwidth wins; the first declared variant wins ties.
pub fn select_best_variant(variants: &[Variant]) -> Option<&Variant> {
    variants.iter().fold(None, |best: Option<&Variant>, v| match best {
        Some(b) if b.bandwidth >= v.bandwidth => Some(b),
        _ => Some(v),
    })
}

pub fn has_scheme(uri: &str) -> bool {
    SCHEME.is_match(uri)
}

/// Resolve `uri` against the playlist URL `base`. URIs that already carry a
/// scheme are returned as-is.
pub fn resolve_uri(base: &str, uri: &str) -> String {
    if has_scheme(uri) {
        return uri.to_string();
    }
    match Url::parse(base).and_then(|b| b.join(uri)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => {
            let dir = base.rsplit_once('/').map_or(base, |(dir, _)| dir);
            format!("{dir}/{}", uri.trim_start_matches('/'))
        }
    }
}

/// Make every segment line and `URI="…"` attribute absolute relative to
/// `base_url`, the URL the playlist was fetched from.
pub fn rewrite_media_playlist(body: &str, base_url: &str) -> String {
    let mut out = String::with_capacity(body.len() + body.len() / 2);

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('#') {
            if line.contains("URI=\"") {
                let rewritten = URI_ATTR.replace_all(line, |caps: &Captures| {
                    format!("URI=\"{}\"", resolve_uri(base_url, &caps[1]))
                });
                out.push_str(&rewritten);
            } else {
                out.push_str(line);
            }
        } else {
            out.push_str(&resolve_uri(base_url, line));
        }
        out.push('\n');
    }

    out
}

/// Parse an HLS attribute list (`KEY=value,KEY="quoted,value"`).
fn parse_attributes(attr_str: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut chars = attr_str.chars().peekable();

    while chars.peek().is_some() {
        let key: String = chars.by_ref().take_while(|&c| c != '=').collect();
        if key.is_empty() {
            break;
        }

        let value = if chars.peek() == Some(&'"') {
            chars.next(); // opening quote
            let v: String = chars.by_ref().take_while(|&c| c != '"').collect();
            chars.next(); // trailing comma
            v
        } else {
            chars.by_ref().take_while(|&c| c != ',').collect()
        };

        attrs.insert(key.trim().to_string(), value.trim().to_string());
    }

    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=500,RESOLUTION=640x360
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1200,RESOLUTION=1280x720,CODECS=\"avc1.4d401f,mp4a.40.2\"
mid/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=800,RESOLUTION=960x540
high/index.m3u8
";

    #[test]
    fn detects_hls_marker() {
        assert!(is_hls("#EXTM3U\n#EXT-X-VERSION:3"));
        assert!(is_hls("\u{feff}  #EXTM3U"));
        assert!(!is_hls("<html>"));
        assert!(!is_hls(""));
    }

    #[test]
    fn parse_attributes_handles_quotes() {
        let attrs = parse_attributes("BANDWIDTH=1280000,RESOLUTION=720x480");
        assert_eq!(attrs.get("BANDWIDTH"), Some(&"1280000".to_string()));
        assert_eq!(attrs.get("RESOLUTION"), Some(&"720x480".to_string()));

        let attrs = parse_attributes("CODECS=\"avc1.4d401f,mp4a.40.2\",BANDWIDTH=2000000");
        assert_eq!(attrs.get("CODECS"), Some(&"avc1.4d401f,mp4a.40.2".to_string()));
        assert_eq!(attrs.get("BANDWIDTH"), Some(&"2000000".to_string()));
    }

    #[test]
    fn selects_maximum_bandwidth_variant() {
        let variants = parse_variants(MASTER);
        let bandwidths: Vec<u64> = variants.iter().map(|v| v.bandwidth).collect();
        assert_eq!(bandwidths, vec![500, 1200, 800]);

        let best = select_best_variant(&variants).unwrap();
        assert_eq!(best.bandwidth, 1200);
        assert_eq!(best.uri, "mid/index.m3u8");
        assert_eq!(best.codecs.as_deref(), Some("avc1.4d401f,mp4a.40.2"));
    }

    #[test]
    fn bandwidth_ties_keep_first_variant() {
        let body = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=900
a.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=900
b.m3u8
";
        let variants = parse_variants(body);
        assert_eq!(select_best_variant(&variants).unwrap().uri, "a.m3u8");
        assert!(select_best_variant(&[]).is_none());
    }

    #[test]
    fn normalizes_space_delimited_bodies() {
        let body = "#EXTM3U #EXT-X-TARGETDURATION:6 #EXTINF:6.0, seg1.ts #EXTINF:6.0, seg2.ts";
        let normalized = normalize_line_breaks(body);
        assert_eq!(
            normalized.lines().collect::<Vec<_>>(),
            vec![
                "#EXTM3U",
                "#EXT-X-TARGETDURATION:6",
                "#EXTINF:6.0,",
                "seg1.ts",
                "#EXTINF:6.0,",
                "seg2.ts"
            ]
        );
        assert_eq!(normalize_line_breaks("#EXTM3U\r\nseg.ts\r\n"), "#EXTM3U\nseg.ts\n");
    }

    #[test]
    fn single_line_titles_stay_with_their_tag() {
        let body = "#EXTM3U #EXT-X-TARGETDURATION:6 #EXTINF:6.0,Live Show seg1.ts #EXTINF:6.0,Late  News seg2.ts";
        let normalized = normalize_line_breaks(body);
        assert_eq!(
            normalized.lines().collect::<Vec<_>>(),
            vec![
                "#EXTM3U",
                "#EXT-X-TARGETDURATION:6",
                "#EXTINF:6.0,Live Show",
                "seg1.ts",
                "#EXTINF:6.0,Late News",
                "seg2.ts"
            ]
        );

        let out = rewrite_media_playlist(&normalized, "http://u/live/x.m3u8");
        assert!(out.contains("#EXTINF:6.0,Live Show\nhttp://u/live/seg1.ts\n"));
        assert!(!out.contains("http://u/live/Show"));

        let master = "#EXTM3U #EXT-X-STREAM-INF:BANDWIDTH=900,CODECS=\"avc1.4d401f, mp4a.40.2\" hd.m3u8";
        let variants = parse_variants(&normalize_line_breaks(master));
        assert_eq!(variants[0].uri, "hd.m3u8");
        assert_eq!(variants[0].codecs.as_deref(), Some("avc1.4d401f, mp4a.40.2"));
    }

    #[test]
    fn resolves_uris() {
        let base = "https://cdn.example.com/live/news/index.m3u8?token=abc";
        assert_eq!(
            resolve_uri(base, "seg1.ts"),
            "https://cdn.example.com/live/news/seg1.ts"
        );
        assert_eq!(
            resolve_uri(base, "/other/seg1.ts"),
            "https://cdn.example.com/other/seg1.ts"
        );
        assert_eq!(
            resolve_uri(base, "https://edge.example.net/seg1.ts"),
            "https://edge.example.net/seg1.ts"
        );
    }

    #[test]
    fn rewrites_segments_and_keys() {
        let body = "#EXTM3U
#EXT-X-TARGETDURATION:6
#EXT-X-KEY:METHOD=AES-128,URI=\"keys/k1.bin\",IV=0x1
#EXTINF:6.0,
seg1.ts
#EXTINF:6.0,
http://other.example.com/seg2.ts
#EXT-X-ENDLIST
";
        let out = rewrite_media_playlist(body, "http://u/live/x.m3u8");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[2],
            "#EXT-X-KEY:METHOD=AES-128,URI=\"http://u/live/keys/k1.bin\",IV=0x1"
        );
        assert_eq!(lines[4], "http://u/live/seg1.ts");
        assert_eq!(lines[6], "http://other.example.com/seg2.ts");
        assert_eq!(lines[7], "#EXT-X-ENDLIST");
    }

    #[tokio::test]
    async fn rewrites_master_via_best_variant() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/live/master.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MASTER))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/live/mid/index.m3u8"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("#EXTM3U\n#EXTINF:4.0,\nseg1.ts\n#EXTINF:4.0,\nseg2.ts\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let rewriter = ManifestRewriter::new(UpstreamClient::new().unwrap());
        let mut descriptor =
            StreamDescriptor::new(format!("{}/live/master.m3u8", server.uri()));
        descriptor.drm = Some(DrmInfo {
            license_url: "https://license.example.com".into(),
            headers: HashMap::new(),
        });

        let playback = rewriter.rewrite(descriptor).await.unwrap();
        let Playback::Playlist { url, body, drm, .. } = playback else {
            panic!("expected playlist");
        };
        assert_eq!(url, format!("{}/live/mid/index.m3u8", server.uri()));
        assert!(body.contains(&format!("{}/live/mid/seg1.ts", server.uri())));
        assert_eq!(drm.unwrap().license_url, "https://license.example.com");
    }

    #[tokio::test]
    async fn relative_uris_follow_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/live/u/p/1.m3u8"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/edge/tok/master.m3u8", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/edge/tok/master.m3u8"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800\nmid.m3u8\n"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/edge/tok/mid.m3u8"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/cdn/7/mid.m3u8", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cdn/7/mid.m3u8"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("#EXTM3U\n#EXTINF:4.0,\nseg1.ts\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let rewriter = ManifestRewriter::new(UpstreamClient::new().unwrap());
        let descriptor = StreamDescriptor::new(format!("{}/live/u/p/1.m3u8", server.uri()));
        let Playback::Playlist { url, body, .. } = rewriter.rewrite(descriptor).await.unwrap()
        else {
            panic!("expected playlist");
        };
        assert_eq!(url, format!("{}/cdn/7/mid.m3u8", server.uri()));
        assert!(body.contains(&format!("{}/cdn/7/seg1.ts", server.uri())));
    }

    #[tokio::test]
    async fn media_playlist_base_is_redirect_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/live/news.m3u8"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("Location", format!("{}/edge/news/index.m3u8", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/edge/news/index.m3u8"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(
                    "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"k.bin\"\n#EXTINF:4.0,\nseg1.ts\n",
                ),
            )
            .mount(&server)
            .await;

        let rewriter = ManifestRewriter::new(UpstreamClient::new().unwrap());
        let descriptor = StreamDescriptor::new(format!("{}/live/news.m3u8", server.uri()));
        let Playback::Playlist { url, body, .. } = rewriter.rewrite(descriptor).await.unwrap()
        else {
            panic!("expected playlist");
        };
        assert_eq!(url, format!("{}/edge/news/index.m3u8", server.uri()));
        assert!(body.contains(&format!("URI=\"{}/edge/news/k.bin\"", server.uri())));
        assert!(body.contains(&format!("{}/edge/news/seg1.ts", server.uri())));
    }

    #[tokio::test]
    async fn non_hls_content_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let rewriter = ManifestRewriter::new(UpstreamClient::new().unwrap());
        let descriptor = StreamDescriptor::new(format!("{}/movie.mp4", server.uri()));
        let playback = rewriter.rewrite(descriptor.clone()).await.unwrap();
        assert_eq!(playback, Playback::Direct(descriptor));
    }
}

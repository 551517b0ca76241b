// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Redirect URL helpers

use url::Url;

const REDIRECT_MARKER: &str = "/e/";

/// Destination of a redirect URL of the form `{prefix}/e/{target}`.
///
/// A target without a scheme is assumed to be `https`. URLs that are not
/// redirect URLs are their own destination.
pub fn compute_destination_url(url: &str) -> String {
    let Some(pos) = url.find(REDIRECT_MARKER) else {
        return url.to_string();
    };
    let target = &url[pos + REDIRECT_MARKER.len()..];
    let lower = target.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        target.to_string()
    } else {
        format!("https://{}", target)
    }
}

/// Parse an absolute `http` or `https` URL.
pub fn try_parse_http_url(value: &str) -> Option<Url> {
    Url::parse(value)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
}

/// Hostname of an absolute URL, if any.
pub fn hostname_of(value: &str) -> Option<String> {
    Url::parse(value)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

//! Reasons a response may not be reusable from an HTTP cache.

use std::fmt;

use plektron_net::Headers;

const MIN_USEFUL_MAX_AGE_SECS: u64 = 3600;

/// One reason a response is not worth keeping in an HTTP cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum UncacheableReason {
    /// Status other than 200 or 206.
    NoData = 1 << 0,
    PartialWithoutStrongValidators = 1 << 1,
    NoCache = 1 << 2,
    NoStore = 1 << 3,
    MustRevalidate = 1 << 4,
    /// `max-age` below one hour.
    ShortMaxAge = 1 << 5,
}

const ALL_REASONS: [UncacheableReason; 6] = [
    UncacheableReason::NoData,
    UncacheableReason::PartialWithoutStrongValidators,
    UncacheableReason::NoCache,
    UncacheableReason::NoStore,
    UncacheableReason::MustRevalidate,
    UncacheableReason::ShortMaxAge,
];

/// Bit set of [`UncacheableReason`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct UncacheableReasons(u8);

impl UncacheableReasons {
    pub fn insert(&mut self, reason: UncacheableReason) {
        self.0 |= reason as u8;
    }

    pub fn contains(self, reason: UncacheableReason) -> bool {
        self.0 & reason as u8 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = UncacheableReason> {
        ALL_REASONS.into_iter().filter(move |r| self.contains(*r))
    }
}

impl fmt::Debug for UncacheableReasons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Inspect status and headers for anything that defeats HTTP caching.
pub fn uncacheable_reasons(status: u16, headers: &Headers) -> UncacheableReasons {
    let mut reasons = UncacheableReasons::default();

    if status != 200 && status != 206 {
        reasons.insert(UncacheableReason::NoData);
    }
    if status == 206 && !has_strong_validators(headers) {
        reasons.insert(UncacheableReason::PartialWithoutStrongValidators);
    }

    let cache_control = headers
        .get("cache-control")
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if cache_control.contains("no-cache") {
        reasons.insert(UncacheableReason::NoCache);
    }
    if cache_control.contains("no-store") {
        reasons.insert(UncacheableReason::NoStore);
    }
    if cache_control.contains("must-revalidate") {
        reasons.insert(UncacheableReason::MustRevalidate);
    }
    if let Some(max_age) = max_age_secs(&cache_control)
        && max_age < MIN_USEFUL_MAX_AGE_SECS
    {
        reasons.insert(UncacheableReason::ShortMaxAge);
    }

    reasons
}

fn has_strong_validators(headers: &Headers) -> bool {
    let strong_etag = headers
        .get("etag")
        .map(str::trim)
        .is_some_and(|etag| !etag.is_empty() && !etag.starts_with("W/"));
    let last_modified = headers
        .get("last-modified")
        .is_some_and(|v| !v.trim().is_empty());
    strong_etag || last_modified
}

fn max_age_secs(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        let value = directive.trim().strip_prefix("max-age=")?;
        value.trim().trim_matches('"').parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use UncacheableReason::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        let mut h = Headers::new();
        for (k, v) in pairs {
            h.insert(*k, *v);
        }
        h
    }

    #[rstest]
    #[case::plain_ok(200, &[], &[])]
    #[case::not_found(404, &[], &[NoData])]
    #[case::partial_no_validator(206, &[], &[PartialWithoutStrongValidators])]
    #[case::partial_weak_etag(206, &[("ETag", "W/\"x\"")], &[PartialWithoutStrongValidators])]
    #[case::partial_strong_etag(206, &[("ETag", "\"x\"")], &[])]
    #[case::partial_last_modified(206, &[("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")], &[])]
    #[case::no_cache(200, &[("Cache-Control", "No-Cache")], &[NoCache])]
    #[case::no_store_revalidate(200, &[("Cache-Control", "no-store, must-revalidate")], &[NoStore, MustRevalidate])]
    #[case::short_max_age(200, &[("Cache-Control", "public, max-age=60")], &[ShortMaxAge])]
    #[case::long_max_age(200, &[("Cache-Control", "max-age=86400")], &[])]
    fn reasons(
        #[case] status: u16,
        #[case] pairs: &[(&str, &str)],
        #[case] expected: &[UncacheableReason],
    ) {
        let got = uncacheable_reasons(status, &headers(pairs));
        assert_eq!(got.iter().collect::<Vec<_>>(), expected.to_vec());
        assert_eq!(got.is_empty(), expected.is_empty());
    }
}

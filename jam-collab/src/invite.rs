use url::Url;

/// Returns `base` with the invite token set as the `parameter` query parameter.
/// Any previous value of the parameter is replaced, other parameters are kept.
pub fn invite_link(base: &Url, parameter: &str, token: &str) -> Url {
    let mut link = base.clone();

    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != parameter)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    link.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(parameter, token);

    link
}

/// Reads the invite token out of a link, if it has a non-empty one
pub fn token_from_link(link: &Url, parameter: &str) -> Option<String> {
    link.query_pairs()
        .find(|(key, _)| key == parameter)
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty())
}

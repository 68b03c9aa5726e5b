//! URL-safe names for packages and tags.

/// Maximum length of a package name in the local catalog.
pub const PACKAGE_NAME_MAX_LENGTH: usize = 100;
const PACKAGE_NAME_MIN_LENGTH: usize = 2;
const TAG_MAX_LENGTH: usize = 100;
const TAG_MIN_LENGTH: usize = 2;

/// Turns a dataset title into a package name.
///
/// Separators become dashes, anything outside `[a-z0-9_-]` is dropped and
/// dash runs collapse. Long names are cut, keeping a trailing year.
///
/// ```
/// use dkan_harvest_core::munge::munge_title_to_name;
///
/// assert_eq!(munge_title_to_name("Air Quality: 2019/2020"), "air-quality-2019-2020");
/// assert_eq!(munge_title_to_name("Budget (FY) v2.1"), "budget-fy-v2-1");
/// ```
pub fn munge_title_to_name(title: &str) -> String {
    let replaced: String = title
        .chars()
        .filter_map(|c| match c {
            ' ' | '.' | ':' | '/' => Some('-'),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => {
                Some(c.to_ascii_lowercase())
            }
            _ => None,
        })
        .collect();

    let mut name = collapse_dashes(&replaced).trim_matches('-').to_string();

    let max_length = PACKAGE_NAME_MAX_LENGTH - 5;
    if name.len() > max_length {
        name = match trailing_year(&name) {
            Some(year) => format!("{}-{}", &name[..max_length - year.len() - 1], year),
            None => name[..max_length].to_string(),
        };
    }

    to_length(name, PACKAGE_NAME_MIN_LENGTH, PACKAGE_NAME_MAX_LENGTH)
}

/// Normalizes a tag name: lowercase, `[a-z0-9 -]` only, spaces as dashes.
///
/// ```
/// use dkan_harvest_core::munge::munge_tag;
///
/// assert_eq!(munge_tag("  Public Health & Safety "), "public-health--safety");
/// ```
pub fn munge_tag(tag: &str) -> String {
    let cleaned: String = tag
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == ' ')
        .map(|c| if c == ' ' { '-' } else { c })
        .collect();
    to_length(cleaned, TAG_MIN_LENGTH, TAG_MAX_LENGTH)
}

fn collapse_dashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_dash = false;
    for c in s.chars() {
        if c == '-' {
            if !prev_dash {
                out.push(c);
            }
            prev_dash = true;
        } else {
            out.push(c);
            prev_dash = false;
        }
    }
    out
}

/// Matches a trailing `[-_]YYYY` or `[-_]YY-YYYY` style suffix.
fn trailing_year(name: &str) -> Option<&str> {
    let is_year = |s: &str| (2..=4).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit());

    let (head, last) = name.rsplit_once(['-', '_'])?;
    if !is_year(last) || head.is_empty() {
        return None;
    }
    // Two-part form such as 2019-2020.
    if let Some((head2, first)) = head.rsplit_once(['-', '_']) {
        if is_year(first) && !head2.is_empty() {
            let start = head2.len() + 1;
            return Some(&name[start..]);
        }
    }
    Some(last)
}

fn to_length(mut s: String, min: usize, max: usize) -> String {
    while s.len() < min {
        s.push('_');
    }
    s.truncate(max);
    s
}

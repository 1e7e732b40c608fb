use lazy_static::lazy_static;
use regex::Regex;

const QUALIFIED_NAME_MAX_LEN: usize = 63;
const LABEL_VALUE_MAX_LEN: usize = 63;
const DNS1123_SUBDOMAIN_MAX_LEN: usize = 253;

lazy_static! {
    static ref QUALIFIED_NAME_RE: Regex =
        Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").unwrap();
    static ref LABEL_VALUE_RE: Regex =
        Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").unwrap();
    static ref DNS1123_SUBDOMAIN_RE: Regex =
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap();
}

/// Checks that a label or taint key is a valid qualified name: a name part
/// with an optional DNS subdomain prefix separated by '/'. Returns one
/// message per violation; an empty result means the name is valid.
pub fn qualified_name_errors(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    let parts: Vec<&str> = value.split('/').collect();
    let name = match parts.len() {
        1 => parts[0],
        2 => {
            let (prefix, name) = (parts[0], parts[1]);
            if prefix.is_empty() {
                errs.push("prefix part must be non-empty".to_string());
            } else {
                for msg in dns1123_subdomain_errors(prefix) {
                    errs.push(format!("prefix part {}", msg));
                }
            }
            name
        }
        _ => {
            errs.push(
                "a qualified name must consist of a name part with an optional \
                 DNS subdomain prefix and '/' (e.g. 'example.com/MyName')"
                    .to_string(),
            );
            return errs;
        }
    };

    if name.is_empty() {
        errs.push("name part must be non-empty".to_string());
    } else if name.len() > QUALIFIED_NAME_MAX_LEN {
        errs.push(format!(
            "name part must be no more than {} characters",
            QUALIFIED_NAME_MAX_LEN
        ));
    }
    if !QUALIFIED_NAME_RE.is_match(name) {
        errs.push(
            "name part must consist of alphanumeric characters, '-', '_' or '.', \
             and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    errs
}

/// Checks that a string is usable as a label or taint value: empty, or
/// alphanumerics plus '-', '_' and '.' with alphanumeric ends, 63 chars max.
pub fn label_value_errors(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > LABEL_VALUE_MAX_LEN {
        errs.push(format!(
            "must be no more than {} characters",
            LABEL_VALUE_MAX_LEN
        ));
    }
    if !LABEL_VALUE_RE.is_match(value) {
        errs.push(
            "a valid value must be an empty string or consist of alphanumeric \
             characters, '-', '_' or '.', and must start and end with an \
             alphanumeric character"
                .to_string(),
        );
    }
    errs
}

fn dns1123_subdomain_errors(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_SUBDOMAIN_MAX_LEN {
        errs.push(format!(
            "must be no more than {} characters",
            DNS1123_SUBDOMAIN_MAX_LEN
        ));
    }
    if !DNS1123_SUBDOMAIN_RE.is_match(value) {
        errs.push(
            "must consist of lower case alphanumeric characters, '-' or '.', \
             and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    errs
}

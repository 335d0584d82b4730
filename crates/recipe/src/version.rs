//! Version template substitution.
//!
//! The `deb-version` header value may contain placeholders:
//! - `{time}` - build start time as `YYYYMMDDHHMM` (UTC)
//! - `{revno}` - revision number of the base branch
//! - `{revno:<nickname>}` - revision number of the named branch

use chrono::{DateTime, Utc};

const TIME_PLACEHOLDER: &str = "{time}";

/// Placeholder for the revision number of a branch (`None` = base branch).
pub fn revno_placeholder(nickname: Option<&str>) -> String {
    match nickname {
        Some(name) => format!("{{revno:{name}}}"),
        None => "{revno}".to_string(),
    }
}

/// Replace `{time}` with `time` formatted as `YYYYMMDDHHMM`.
pub fn substitute_time(template: &str, time: &DateTime<Utc>) -> String {
    if !template.contains(TIME_PLACEHOLDER) {
        return template.to_string();
    }
    template.replace(TIME_PLACEHOLDER, &time.format("%Y%m%d%H%M").to_string())
}

/// Whether `template` asks for the revision number of a branch.
pub fn needs_revno(template: &str, nickname: Option<&str>) -> bool {
    template.contains(&revno_placeholder(nickname))
}

/// Replace the revno placeholder for one branch.
pub fn substitute_revno(template: &str, nickname: Option<&str>, revno: u64) -> String {
    template.replace(&revno_placeholder(nickname), &revno.to_string())
}

/// The first placeholder left in `template`, if any.
pub fn unexpanded(template: &str) -> Option<&str> {
    let start = template.find('{')?;
    let end = template[start..]
        .find('}')
        .map_or(template.len(), |offset| start + offset + 1);
    Some(&template[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_substitute_time() {
        let time = Utc.with_ymd_and_hms(2009, 8, 19, 15, 12, 0).unwrap();
        assert_eq!(substitute_time("1.0+{time}", &time), "1.0+200908191512");
        assert_eq!(substitute_time("1.0", &time), "1.0");
    }

    #[test]
    fn test_substitute_revno() {
        let template = "1.0+{revno}-{revno:packaging}";
        assert!(needs_revno(template, None));
        assert!(needs_revno(template, Some("packaging")));
        assert!(!needs_revno(template, Some("artwork")));

        let step = substitute_revno(template, None, 42);
        assert_eq!(step, "1.0+42-{revno:packaging}");
        assert_eq!(
            substitute_revno(&step, Some("packaging"), 7),
            "1.0+42-7"
        );
    }

    #[test]
    fn test_unexpanded() {
        assert_eq!(unexpanded("1.0+42"), None);
        assert_eq!(unexpanded("1.0+{revno:foo}-1"), Some("{revno:foo}"));
        assert_eq!(unexpanded("1.0+{broken"), Some("{broken"));
    }
}

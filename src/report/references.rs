//! Name resolution across a document: every name a chunk reads must be bound
//! by that chunk, by an earlier chunk, or be a builtin.
//!
//! A star import binds names nobody can list without running it. From the
//! first chunk with one onwards, unknown names are left to the fresh-session
//! run to catch.

use std::collections::BTreeSet;

use tracing::warn;

use crate::session::Analysis;

/// One fragment as analysed, in document order.
pub(crate) struct Fragment<'a> {
    pub chunk: &'a str,
    pub analysis: &'a Analysis,
}

/// The first fragment reading names nothing before it binds, with those names.
pub(crate) fn first_unresolved<'a>(
    fragments: &[Fragment<'a>],
    builtins: &[String],
) -> Option<(&'a str, Vec<String>)> {
    let mut bound: BTreeSet<&str> = builtins.iter().map(String::as_str).collect();
    let mut star: Option<(&str, &str)> = None;
    for fragment in fragments {
        if star.is_none() {
            star = fragment.analysis.star_imports.first().map(|m| (fragment.chunk, m.as_str()));
        }
        let own: BTreeSet<&str> = fragment.analysis.stores.iter().map(String::as_str).collect();
        let free: Vec<String> = fragment
            .analysis
            .loads
            .iter()
            .filter(|name| !bound.contains(name.as_str()) && !own.contains(name.as_str()))
            .cloned()
            .collect();
        match star {
            _ if free.is_empty() => {}
            Some((origin, module)) => warn!(
                chunk = fragment.chunk,
                names = ?free,
                origin,
                module,
                "names may come from a star import; not checked statically"
            ),
            None => return Some((fragment.chunk, free)),
        }
        bound.extend(own);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(loads: &[&str], stores: &[&str]) -> Analysis {
        Analysis {
            loads: loads.iter().map(|s| s.to_string()).collect(),
            stores: stores.iter().map(|s| s.to_string()).collect(),
            sources: vec![],
            star_imports: vec![],
        }
    }

    #[test]
    fn names_flow_forward_between_chunks() {
        let load = analysis(&["pd"], &["pd", "df"]);
        let summary = analysis(&["df", "len", "print"], &[]);
        let fragments = [
            Fragment { chunk: "load", analysis: &load },
            Fragment { chunk: "summary", analysis: &summary },
        ];
        let builtins = vec!["len".to_string(), "print".to_string()];
        assert_eq!(first_unresolved(&fragments, &builtins), None);
    }

    #[test]
    fn undeclared_table_names_the_chunk() {
        let plot = analysis(&["df", "plt"], &["plt"]);
        let fragments = [Fragment { chunk: "plot", analysis: &plot }];
        assert_eq!(
            first_unresolved(&fragments, &[]),
            Some(("plot", vec!["df".to_string()]))
        );
    }

    #[test]
    fn later_bindings_do_not_resolve_earlier_reads() {
        let first = analysis(&["total"], &[]);
        let second = analysis(&[], &["total"]);
        let fragments = [
            Fragment { chunk: "chunk-1", analysis: &first },
            Fragment { chunk: "chunk-2", analysis: &second },
        ];
        assert_eq!(first_unresolved(&fragments, &[]).map(|(c, _)| c), Some("chunk-1"));
    }

    #[test]
    fn star_imports_leave_unknown_names_to_the_run() {
        let mut setup = analysis(&[], &[]);
        setup.star_imports = vec!["math".to_string()];
        let usage = analysis(&["sqrt", "print"], &[]);
        let fragments = [
            Fragment { chunk: "setup", analysis: &setup },
            Fragment { chunk: "use", analysis: &usage },
        ];
        let builtins = vec!["print".to_string()];
        assert_eq!(first_unresolved(&fragments, &builtins), None);

        // Reads before the star import are still checked.
        let fragments = [
            Fragment { chunk: "use", analysis: &usage },
            Fragment { chunk: "setup", analysis: &setup },
        ];
        assert_eq!(
            first_unresolved(&fragments, &builtins),
            Some(("use", vec!["sqrt".to_string()]))
        );
    }
}

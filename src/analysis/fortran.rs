//! Fortran source analysis.
//!
//! Works on preprocessed free-form source. A line scanner tracks program
//! unit nesting so that only top-level units (modules, programs, external
//! subprograms) become symbols; `use` statements and leading `call`
//! statements become symbol dependencies. Met-Office-style `DEPENDS ON:`
//! comments are honoured: values ending in `.o` name a C file the build
//! must include, anything else names a symbol the parser cannot see.

use super::{Analysis, AnalysedFile};
use crate::{
    error::{Error, Result},
    sources::HashedFile,
};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_MODULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*module\s+(\w+)\s*$").unwrap());

static RE_PROGRAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*program\s+(\w+)\s*$").unwrap());

static RE_SUBROUTINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:(?:pure|impure|elemental|recursive|module)\s+)*subroutine\s+(\w+)")
        .unwrap()
});

// Optional prefixes cover type-returning forms such as
// `integer function f(x)` and `pure real(kind=8) function f(x)`.
static RE_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:[a-z]\w*(?:\s*\([^)]*\))?\s+)*?function\s+(\w+)\s*\(").unwrap()
});

static RE_END_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*end(?:\s*(module|program|subroutine|function)\b(?:\s+\w+)?)?\s*$").unwrap()
});

static RE_USE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*use\b\s*(?:,\s*(?P<nature>\w+)\s*)?(?:::\s*)?(?P<name>[a-z]\w*)").unwrap()
});

static RE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:\d+\s+)?call\s+(\w+)").unwrap());

static RE_DEPENDS_ON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*!\s*depends\s*on\s*:\s*(\S+)").unwrap());

/// Intrinsic modules never resolve to a source file.
const INTRINSIC_MODULES: &[&str] = &[
    "iso_c_binding",
    "iso_fortran_env",
    "ieee_arithmetic",
    "ieee_exceptions",
    "ieee_features",
    "omp_lib",
    "omp_lib_kinds",
];

pub(crate) fn analyse(hashed: &HashedFile, content: &str) -> Result<Analysis> {
    let mut af = AnalysedFile::new(hashed.path.clone(), hashed.hash);
    let mut units: Vec<&'static str> = Vec::new();

    for (lineno, raw) in content.lines().enumerate() {
        if let Some(cap) = RE_DEPENDS_ON.captures(raw) {
            depends_on_comment(&mut af, &cap[1]);
            continue;
        }

        let line = strip_comment(raw);
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        if let Some(cap) = RE_USE.captures(line) {
            let nature = cap.name("nature").map(|m| m.as_str().to_lowercase());
            let name = cap.name("name").unwrap().as_str().to_lowercase();
            if nature.as_deref() != Some("intrinsic") && !INTRINSIC_MODULES.contains(&name.as_str())
            {
                af.add_symbol_dep(&name);
            }
            continue;
        }

        if let Some(cap) = RE_CALL.captures(line) {
            af.add_symbol_dep(&cap[1]);
            continue;
        }

        if let Some(cap) = RE_END_UNIT.captures(line) {
            // end of a program unit; `end do`, `end if` etc. don't match
            if units.pop().is_none() && cap.get(1).is_some() {
                return Err(parse_error(
                    &af,
                    lineno,
                    format!("unexpected '{}'", line.trim()),
                ));
            }
            continue;
        }

        if let Some(name) = unit_start(line, &mut units) {
            if units.len() == 1 {
                af.add_symbol_def(&name);
            }
        }
    }

    if let Some(unit) = units.last() {
        return Err(Error::Parse {
            path: af.path,
            message: format!("unterminated {unit} at end of file"),
        });
    }

    if af.symbol_defs.is_empty() && af.symbol_deps.is_empty() && af.commented_file_deps.is_empty() {
        return Ok(Analysis::EmptySource(af.path));
    }
    Ok(Analysis::Analysed(af))
}

/// Matches the start of a program unit, pushing its kind. Returns the unit
/// name on a match.
fn unit_start(line: &str, units: &mut Vec<&'static str>) -> Option<String> {
    if let Some(cap) = RE_MODULE.captures(line) {
        let name = cap[1].to_lowercase();
        // `module procedure` names an existing interface, not a new unit
        if name != "procedure" {
            units.push("module");
            return Some(name);
        }
        return None;
    }
    if let Some(cap) = RE_PROGRAM.captures(line) {
        units.push("program");
        return Some(cap[1].to_lowercase());
    }
    if let Some(cap) = RE_SUBROUTINE.captures(line) {
        units.push("subroutine");
        return Some(cap[1].to_lowercase());
    }
    if let Some(cap) = RE_FUNCTION.captures(line) {
        units.push("function");
        return Some(cap[1].to_lowercase());
    }
    None
}

fn depends_on_comment(af: &mut AnalysedFile, value: &str) {
    let value = value.to_lowercase();
    if let Some(stem) = value.strip_suffix(".o") {
        // a reference to compiled C the parser cannot see
        af.add_commented_file_dep(&format!("{stem}.c"));
    } else {
        af.add_symbol_dep(&value);
    }
}

/// Drops a trailing `!` comment, honouring quoted strings.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (idx, ch) in line.char_indices() {
        match (ch, quote) {
            ('\'' | '"', None) => quote = Some(ch),
            (q, Some(open)) if q == open => quote = None,
            ('!', None) => return &line[..idx],
            _ => {}
        }
    }
    line
}

fn parse_error(af: &AnalysedFile, lineno: usize, message: String) -> Error {
    Error::Parse { path: af.path.clone(), message: format!("line {}: {message}", lineno + 1) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analysis;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn analyse_str(content: &str) -> Result<Analysis> {
        let hashed = HashedFile::new(PathBuf::from("test.f90"), 42);
        analyse(&hashed, content)
    }

    fn analysed(content: &str) -> AnalysedFile {
        match analyse_str(content).unwrap() {
            Analysis::Analysed(af) => af,
            other => panic!("expected analysed file, got {other:?}"),
        }
    }

    fn names(set: &std::collections::BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn extracts_module_and_program_defs() {
        let af = analysed(
            "module test_mod\nend module test_mod\nprogram test\nend program test\n",
        );
        assert_eq!(names(&af.symbol_defs), vec!["test", "test_mod"]);
        assert_eq!(af.file_hash, 42);
    }

    #[test]
    fn contained_subprograms_are_not_symbols() {
        let af = analysed(
            r"
module outer
contains
  subroutine helper(x)
  end subroutine helper
  integer function calc(y)
    calc = y
  end function calc
end module outer
",
        );
        assert_eq!(names(&af.symbol_defs), vec!["outer"]);
    }

    #[test]
    fn top_level_subprograms_are_symbols() {
        let af = analysed(
            r"
subroutine standalone(a, b)
end subroutine standalone

pure elemental real function area(r)
  area = r
end function area
",
        );
        assert_eq!(names(&af.symbol_defs), vec!["area", "standalone"]);
    }

    #[test]
    fn use_statements_become_deps() {
        let af = analysed(
            r"
program p
  use constants_mod
  use, intrinsic :: iso_c_binding
  use :: grid_mod, only: nx, ny
end program p
",
        );
        assert_eq!(names(&af.symbol_deps), vec!["constants_mod", "grid_mod"]);
    }

    #[test]
    fn intrinsic_modules_are_skipped_even_unmarked() {
        let af = analysed("program p\n  use iso_fortran_env\n  use mine\nend program p\n");
        assert_eq!(names(&af.symbol_deps), vec!["mine"]);
    }

    #[test]
    fn call_statements_become_deps() {
        let af = analysed(
            r"
subroutine driver
  call init_grid(1, 2)
  100 call finalise
end subroutine driver
",
        );
        assert_eq!(names(&af.symbol_deps), vec!["finalise", "init_grid"]);
    }

    #[test]
    fn single_line_conditional_calls_are_not_extracted() {
        // these are the documented use case for unreferenced dependencies
        let af = analysed("subroutine s\n  if (debug) call trace_me()\nend subroutine s\n");
        assert!(af.symbol_deps.is_empty());
    }

    #[test]
    fn depends_on_comments_split_by_suffix() {
        let af = analysed(
            r"
subroutine wrapper
! DEPENDS ON: portio2a.o
! depends on: other_routine
end subroutine wrapper
",
        );
        assert_eq!(names(&af.commented_file_deps), vec!["portio2a.c"]);
        assert_eq!(names(&af.symbol_deps), vec!["other_routine"]);
    }

    #[test]
    fn names_are_case_insensitive() {
        let af = analysed("MODULE Big_Mod\n  USE Other_Mod\nEND MODULE Big_Mod\n");
        assert_eq!(names(&af.symbol_defs), vec!["big_mod"]);
        assert_eq!(names(&af.symbol_deps), vec!["other_mod"]);
    }

    #[test]
    fn trailing_comments_do_not_hide_code() {
        let af = analysed("module m ! the main module\nend module m\n");
        assert_eq!(names(&af.symbol_defs), vec!["m"]);
    }

    #[test]
    fn bangs_inside_strings_are_not_comments() {
        let af = analysed(
            "subroutine s\n  print *, 'not ! a comment'\n  call after_print\nend subroutine s\n",
        );
        assert_eq!(names(&af.symbol_deps), vec!["after_print"]);
    }

    #[test]
    fn end_do_does_not_close_a_unit() {
        let af = analysed(
            r"
subroutine loops
  do i = 1, 10
  end do
  if (x) then
  end if
end subroutine loops

module after
end module after
",
        );
        assert_eq!(names(&af.symbol_defs), vec!["after", "loops"]);
    }

    #[test]
    fn module_procedure_is_not_a_definition() {
        let af = analysed(
            r"
module m
  interface frob
    module procedure frob_int
  end interface frob
end module m
",
        );
        assert_eq!(names(&af.symbol_defs), vec!["m"]);
    }

    #[test]
    fn comment_only_files_are_empty_sources() {
        let result = analyse_str("! just a header\n\n!\n").unwrap();
        assert_eq!(result, Analysis::EmptySource(PathBuf::from("test.f90")));
    }

    #[test]
    fn unterminated_unit_is_a_parse_failure() {
        let err = analyse_str("module m\n").unwrap_err();
        assert!(err.to_string().contains("unterminated module"));
    }
}

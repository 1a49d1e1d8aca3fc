//! End-to-end build scenarios, driven through [`Project::build`] with stub
//! tools standing in for the preprocessor, compilers, archiver and linker.
//!
//! The stub compiler copies its input to the object path, emits a fake
//! `.mod` per `module` line, and appends every invocation to a log so the
//! tests can assert exactly what got (re)compiled.

#![cfg(unix)]

use sci_build::{AddFlags, BuildOutput, Error, Flags, Project, ProjectBuilder, Tool, Tools};
use std::{
    fs,
    path::{Path, PathBuf},
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

struct TestProject {
    dir: tempfile::TempDir,
}

impl TestProject {
    fn new(files: &[(&str, &str)]) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let project = Self { dir };
        fs::create_dir_all(project.source()).unwrap();
        fs::create_dir_all(project.root().join("stubs")).unwrap();
        for (name, content) in files {
            project.write_source(name, content);
        }
        project.write_stubs();
        project
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn source(&self) -> PathBuf {
        self.root().join("source")
    }

    fn log_path(&self) -> PathBuf {
        self.root().join("invocations.log")
    }

    fn write_source(&self, name: &str, content: &str) {
        let path = self.source().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn stub(&self, name: &str, script: &str) -> Tool {
        use std::os::unix::fs::PermissionsExt;
        let path = self.root().join("stubs").join(name);
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        Tool::new(path)
    }

    fn write_stubs(&self) {
        let log = self.log_path();
        let log = log.display();

        self.stub(
            "fc",
            &format!(
                "#!/bin/sh\n\
                 prev=\"\"; out=\"\"; mods=\"\"\n\
                 while [ $# -gt 0 ]; do\n\
                 \x20 case \"$1\" in\n\
                 \x20   -o) out=\"$2\"; shift 2 ;;\n\
                 \x20   -J) mods=\"$2\"; shift 2 ;;\n\
                 \x20   *) prev=\"$1\"; shift ;;\n\
                 \x20 esac\n\
                 done\n\
                 echo \"fc $prev\" >> \"{log}\"\n\
                 cp \"$prev\" \"$out\"\n\
                 if [ -n \"$mods\" ]; then\n\
                 \x20 grep -i '^module ' \"$prev\" | while read -r _kw name _rest; do\n\
                 \x20   cp \"$prev\" \"$mods/$name.mod\"\n\
                 \x20 done\n\
                 fi\n\
                 exit 0\n"
            ),
        );

        self.stub(
            "cc",
            &format!(
                "#!/bin/sh\n\
                 prev=\"\"; out=\"\"\n\
                 while [ $# -gt 0 ]; do\n\
                 \x20 case \"$1\" in\n\
                 \x20   -o) out=\"$2\"; shift 2 ;;\n\
                 \x20   *) prev=\"$1\"; shift ;;\n\
                 \x20 esac\n\
                 done\n\
                 echo \"cc $prev\" >> \"{log}\"\n\
                 cp \"$prev\" \"$out\"\n"
            ),
        );

        self.stub(
            "pp",
            &format!(
                "#!/bin/sh\n\
                 for a in \"$@\"; do src=\"$dst\"; dst=\"$a\"; done\n\
                 echo \"pp $src\" >> \"{log}\"\n\
                 cp \"$src\" \"$dst\"\n"
            ),
        );

        self.stub(
            "ar",
            "#!/bin/sh\n\
             shift\n\
             archive=\"$1\"; shift\n\
             : > \"$archive\"\n\
             for o in \"$@\"; do printf '%s\\n' \"$o\" >> \"$archive\"; done\n",
        );

        self.stub(
            "ld",
            "#!/bin/sh\n\
             out=\"\"; objs=\"\"\n\
             while [ $# -gt 0 ]; do\n\
             \x20 case \"$1\" in\n\
             \x20   -o) out=\"$2\"; shift 2 ;;\n\
             \x20   -*) shift ;;\n\
             \x20   *) objs=\"$objs $1\"; shift ;;\n\
             \x20 esac\n\
             done\n\
             printf '%s\\n' $objs > \"$out\"\n",
        );
    }

    fn tools(&self) -> Tools {
        let stubs = self.root().join("stubs");
        Tools {
            fc: Tool::new(stubs.join("fc")),
            cc: Tool::new(stubs.join("cc")),
            cpp: Tool::new(stubs.join("pp")),
            fpp: Some(Tool::new(stubs.join("pp"))),
            ld: Tool::new(stubs.join("ld")),
            ar: Tool::new(stubs.join("ar")),
            fflags: Vec::new(),
            module_dir_flag: "-J".to_string(),
        }
    }

    fn builder(&self) -> ProjectBuilder {
        Project::builder(self.root()).source(self.source()).tools(self.tools()).jobs(2)
    }

    fn build(&self) -> sci_build::Result<BuildOutput> {
        self.builder().root_symbol("p").build().unwrap().build()
    }

    /// Compile invocations so far, e.g. `["fc /…/m.f90", "fc /…/prog.f90"]`.
    fn compile_log(&self) -> Vec<String> {
        let Ok(content) = fs::read_to_string(self.log_path()) else { return Vec::new() };
        content
            .lines()
            .filter(|line| line.starts_with("fc ") || line.starts_with("cc "))
            .map(String::from)
            .collect()
    }

    fn source_path(&self, name: &str) -> PathBuf {
        self.source().join(name)
    }
}

const PROG_F90: &str = "program p\n  use m\nend program p\n";
const M_F90: &str = "module m\nend module m\n";

#[test]
fn single_program_builds_in_dependency_order() {
    // scenario: a program using one module
    let project = TestProject::new(&[("prog.f90", PROG_F90), ("m.f90", M_F90)]);
    let output = project.build().unwrap();

    // symbol table routed the dependency through m.f90
    let prog = &output.analysed[&project.source_path("prog.f90")];
    assert!(prog.file_deps.contains(&project.source_path("m.f90")));

    // the build tree is exactly the two files
    let tree: Vec<_> = output.build_tree.keys().cloned().collect();
    assert_eq!(tree, vec![project.source_path("m.f90"), project.source_path("prog.f90")]);

    // two compile invocations, the module strictly first
    let log = project.compile_log();
    assert_eq!(log.len(), 2);
    assert!(log[0].ends_with("m.f90"), "{log:?}");
    assert!(log[1].ends_with("prog.f90"), "{log:?}");

    // the archive lists both objects
    let archive = fs::read_to_string(&output.object_archive).unwrap();
    assert_eq!(archive.lines().count(), 2);
    assert!(archive.lines().any(|l| l.ends_with("prog.o")));
}

#[test]
fn rerun_without_changes_compiles_nothing() {
    let project = TestProject::new(&[("prog.f90", PROG_F90), ("m.f90", M_F90)]);
    project.build().unwrap();
    let log_after_first = project.compile_log();
    let table = fs::read_to_string(project.root().join("__compilation.csv")).unwrap();

    project.build().unwrap();
    assert_eq!(project.compile_log(), log_after_first);
    let table_after = fs::read_to_string(project.root().join("__compilation.csv")).unwrap();
    assert_eq!(table_after, table);
}

#[test]
fn changing_a_leaf_module_recompiles_its_dependents() {
    let project = TestProject::new(&[("prog.f90", PROG_F90), ("m.f90", M_F90)]);
    project.build().unwrap();
    let first = project.compile_log().len();

    // any byte counts, even a comment
    project.write_source("m.f90", "module m\n! tweak\nend module m\n");
    project.build().unwrap();

    let log = project.compile_log();
    // m for its source change, prog because m's module artifact changed
    assert_eq!(log.len(), first + 2, "{log:?}");
    assert!(log[first].ends_with("m.f90"));
    assert!(log[first + 1].ends_with("prog.f90"));
}

#[test]
fn changing_flags_recompiles_only_matching_files() {
    let project = TestProject::new(&[("prog.f90", PROG_F90), ("m.f90", M_F90)]);
    project.build().unwrap();
    let first = project.compile_log().len();

    let flags = Flags::new(Vec::<String>::new(), vec![AddFlags::new("m.f90", ["-DX"]).unwrap()]);
    project
        .builder()
        .root_symbol("p")
        .fc_flags(flags)
        .build()
        .unwrap()
        .build()
        .unwrap();

    // m recompiles for its flags; the re-emitted module artifact is
    // identical, so prog is not dragged in
    let log = project.compile_log();
    assert_eq!(log.len(), first + 1, "{log:?}");
    assert!(log[first].ends_with("m.f90"));
}

#[test]
fn duplicate_symbol_warns_and_first_definer_wins() {
    let project = TestProject::new(&[
        ("prog.f90", PROG_F90),
        ("m.f90", M_F90),
        ("m2.f90", "module m\nend module m\n"),
    ]);
    let output = project.build().unwrap();

    assert!(output.build_tree.contains_key(&project.source_path("m.f90")));
    assert!(!output.build_tree.contains_key(&project.source_path("m2.f90")));
}

#[test]
fn commented_c_dependency_is_compiled_and_linked() {
    let project = TestProject::new(&[
        (
            "prog.f90",
            "program p\n! DEPENDS ON: helper.o\nend program p\n",
        ),
        ("helper.c", "void helper(void) {}\n"),
    ]);
    let output = project.build().unwrap();

    // the preprocessed C file landed in the build tree via the comment
    let helper = project.root().join("build_output/helper.c");
    assert!(output.build_tree.contains_key(&helper), "{:?}", output.build_tree.keys());

    assert_eq!(output.compiled_c.len(), 1);
    assert!(output.compiled_c[0].output_path.ends_with("helper.o"));

    let archive = fs::read_to_string(&output.object_archive).unwrap();
    assert!(archive.lines().any(|l| l.ends_with("helper.o")), "{archive}");
}

#[test]
fn unreferenced_dependencies_are_forced_into_the_build() {
    let project = TestProject::new(&[
        ("prog.f90", "program p\nend program p\n"),
        ("util.f90", "subroutine util_sub\n  use util_mod\nend subroutine util_sub\n"),
        ("util_mod.f90", "module util_mod\nend module util_mod\n"),
    ]);
    let output = project
        .builder()
        .root_symbol("p")
        .unreferenced_dependency("util_sub")
        .build()
        .unwrap()
        .build()
        .unwrap();

    assert!(output.build_tree.contains_key(&project.source_path("util.f90")));
    assert!(output.build_tree.contains_key(&project.source_path("util_mod.f90")));
    assert_eq!(output.compiled_fortran.len(), 3);
}

#[test]
fn phantom_file_dep_fails_with_an_unfulfilled_report() {
    let project = TestProject::new(&[("prog.f90", PROG_F90), ("m.f90", M_F90)]);
    project.build().unwrap();

    // poison the carried-over analysis row for prog.f90 with a file dep
    // that exists nowhere in the source tree
    let table = project.root().join("__analysis.csv");
    let content = fs::read_to_string(&table).unwrap();
    let poisoned: Vec<String> = content
        .lines()
        .map(|line| {
            if line.contains("prog.f90") {
                let stripped = line.strip_suffix(",,").expect("prog row has empty dep columns");
                format!("{stripped},phantom.f90,")
            } else {
                line.to_string()
            }
        })
        .collect();
    fs::write(&table, poisoned.join("\n") + "\n").unwrap();

    let err = project.build().unwrap_err();
    assert!(matches!(err, Error::UnfulfilledDependencies(_)), "{err}");
    let text = err.to_string();
    assert!(text.contains("prog.f90"), "{text}");
    assert!(text.contains("phantom.f90"), "{text}");
}

#[test]
fn missing_root_symbol_is_fatal() {
    let project = TestProject::new(&[("m.f90", M_F90)]);
    let err = project
        .builder()
        .root_symbol("no_such_program")
        .build()
        .unwrap()
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::RootSymbolNotFound(_)), "{err}");
    assert!(err.to_string().contains("no_such_program"));
}

#[test]
fn unpreprocessed_fortran_goes_through_the_preprocessor() {
    let project = TestProject::new(&[
        ("prog.F90", "program p\n  use m\nend program p\n"),
        ("m.f90", M_F90),
    ]);
    let output = project.build().unwrap();

    // the .F90 was preprocessed into the output tree and analysed there
    let preprocessed = project.root().join("build_output/prog.f90");
    assert!(preprocessed.exists());
    assert!(output.build_tree.contains_key(&preprocessed));
}

#[test]
fn artefact_reuse_skips_repeat_preprocessing() {
    let project = TestProject::new(&[
        ("prog.F90", "program p\n  use m\nend program p\n"),
        ("m.F90", "module m\nend module m\n"),
    ]);
    let preprocess_count = |project: &TestProject| {
        fs::read_to_string(project.log_path())
            .map(|log| log.lines().filter(|l| l.starts_with("pp ")).count())
            .unwrap_or(0)
    };

    project
        .builder()
        .root_symbol("p")
        .reuse_artefacts(true)
        .build()
        .unwrap()
        .build()
        .unwrap();
    let first = preprocess_count(&project);
    assert_eq!(first, 2);

    // outputs exist now, so nothing is regenerated
    project
        .builder()
        .root_symbol("p")
        .reuse_artefacts(true)
        .build()
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(preprocess_count(&project), first);
}

#[test]
fn executables_link_all_objects() {
    let project = TestProject::new(&[("prog.f90", PROG_F90), ("m.f90", M_F90)]);
    let exe = project.root().join("build_output/p.exe");
    let output = project
        .builder()
        .root_symbol("p")
        .executable(&exe, ["-lgfortran"])
        .build()
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(output.object_archive, exe);
    let linked = fs::read_to_string(&exe).unwrap();
    assert!(linked.lines().any(|l| l.ends_with("prog.o")), "{linked}");
    assert!(linked.lines().any(|l| l.ends_with("m.o")), "{linked}");
}

#[test]
fn compile_failures_report_every_file_in_the_wave() {
    let project = TestProject::new(&[
        ("a.f90", "program p\nend program p\n"),
        ("b.f90", "subroutine standalone\nend subroutine standalone\n"),
    ]);
    // a compiler that always fails
    let broken = project.stub("fc", "#!/bin/sh\necho synthax error >&2\nexit 1\n");
    let mut tools = project.tools();
    tools.fc = broken;

    let err = project
        .builder()
        .tools(tools)
        .root_symbol("p")
        .unreferenced_dependency("standalone")
        .build()
        .unwrap()
        .build()
        .unwrap_err();

    let text = err.to_string();
    // both ready files failed and both are in the report
    assert!(text.contains("a.f90"), "{text}");
    assert!(text.contains("b.f90"), "{text}");
    assert!(text.contains("synthax error"), "{text}");
}

#[test]
fn skip_files_never_enter_the_pipeline() {
    let project = TestProject::new(&[
        ("prog.f90", "program p\nend program p\n"),
        ("broken.f90", "module broken\n"),
    ]);
    let output = project
        .builder()
        .root_symbol("p")
        .skip_file("broken.f90")
        .build()
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(output.build_tree.len(), 1);
}

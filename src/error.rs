//! Errors raised while parsing or evaluating a manifest.
//!
//! Every hard error is positional: it carries the offending logical line,
//! the manifest file name and the line number, so the user can jump straight
//! to the problem. The first hard error aborts the run.

/// Errors during parsing and evaluation of fox manifests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("expected token '{expected}' in '{line}' ({file}:{line_no})")]
    ExpectedToken {
        expected: String,
        line: String,
        file: String,
        line_no: usize,
    },

    #[error("unexpected token '{rest}' in '{line}' ({file}:{line_no})")]
    UnexpectedToken {
        rest: String,
        line: String,
        file: String,
        line_no: usize,
    },

    #[error("inconsistent whitespace in '{line}' ({file}:{line_no})")]
    InconsistentWhitespace {
        line: String,
        file: String,
        line_no: usize,
    },

    #[error("unexpected indentation in '{line}' ({file}:{line_no})")]
    UnexpectedIndentation {
        line: String,
        file: String,
        line_no: usize,
    },

    #[error(
        "two or more commands generate target '{target}' in '{line}' ({file}:{line_no}), \
         each target must be generated only once"
    )]
    DuplicateTarget {
        target: String,
        line: String,
        file: String,
        line_no: usize,
    },

    #[error("unknown rule {rule} at '{line}' ({file}:{line_no}), available rules : {available}")]
    UnknownRule {
        rule: String,
        available: String,
        line: String,
        file: String,
        line_no: usize,
    },

    #[error(
        "variable was not declared, but is assigned, check this statement '{line}' ({file}:{line_no})"
    )]
    UndeclaredVariable {
        line: String,
        file: String,
        line_no: usize,
    },

    #[error(
        "only \"=\" is supported in rule nested variables, \
         got invalid assign operation '{op}' at rule '{line}' ({file}:{line_no})"
    )]
    InvalidRuleAssignOp {
        op: String,
        line: String,
        file: String,
        line_no: usize,
    },

    #[error(
        "filtering on nested variables ('{name}' in this case) is not supported \
         in '{line}' ({file}:{line_no}), instead please only filter on global variables"
    )]
    FilterOnNestedVariable {
        name: String,
        line: String,
        file: String,
        line_no: usize,
    },

    #[error(
        "cannot expand rule {rule} because of different amount of explicit generated targets \
         and explicit inputs at '{line}' ({file}:{line_no}), to expand this rule build command \
         must have equal amounts of explicit targets and explicit inputs, \
         for example \"build a b c: rule i j k\""
    )]
    ExpandArityMismatch {
        rule: String,
        line: String,
        file: String,
        line_no: usize,
    },

    #[error(
        "unable to deduce auto rule in '{line}', please check if your file extensions are \
         supported by current toolchain ({file}:{line_no}) please also mind that file extensions \
         like object files ('.o' and '.obj') and executables may differ between platforms, \
         so you should use transforms to make them work, \
         for example 'build objects(*): auto *.cpp' instead of 'build *.obj: auto *.cpp'"
    )]
    AutoDeduceFailed {
        line: String,
        file: String,
        line_no: usize,
    },

    #[error("please only use forward slashes in path \"{path}\"")]
    BackslashInPath { path: String },

    #[error("manifest requires buildfox version {required}, but this is buildfox {current}")]
    UnsupportedVersion { required: String, current: String },

    #[error("invalid version requirement '{0}'")]
    InvalidVersion(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("pattern error: {0}")]
    Pattern(#[from] fancy_regex::Error),
}

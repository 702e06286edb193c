//! Evaluation engine.
//!
//! A stateful interpreter over parsed statements. Each manifest file runs in
//! an [`Engine`] holding the scoped state (variables, rules, transformers,
//! auto presets, excluded dirs); the run-wide [`Context`] (generated and
//! seen files, subninja counter) is shared between nested engines. Output
//! lines accumulate in memory and are written in one pass at the end.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::LazyLock;

use fancy_regex::Regex;
use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::emit;
use crate::error::Error;
use crate::finder::{self, FileSet};
use crate::parser::{self, Assign, AssignOp, BuildStmt, Statement, StatementKind};
use crate::pattern;
use crate::version;

// value shaped like `name(arg)` invokes the transformer `name`; an escaped
// `$)` does not close the call
static RE_PATH_TRANSFORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A([a-zA-Z0-9_.-]+)\((.*?)(?<!\$)(?:\$\$)*\)\z").unwrap()
});

type LocalScope = IndexMap<SmolStr, String>;

/// A declared rule: nested variable names to their raw (unevaluated) values.
#[derive(Debug, Clone)]
pub struct Rule {
    pub vars: IndexMap<SmolStr, String>,
}

/// An `auto` preset consulted when a build names the rule `auto`.
#[derive(Debug, Clone)]
pub struct AutoPreset {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub assigns: Vec<Assign>,
}

/// State shared across a whole run, including nested subninja engines.
#[derive(Debug, Default)]
pub struct Context {
    /// Folder to the set of file names declared as build outputs. A target
    /// may be declared only once per run.
    pub generated: FileSet,
    /// Folder to the set of all file names seen as inputs or outputs.
    pub all_files: FileSet,
    /// Number of generated subninja files so far.
    pub subninja_num: usize,
}

/// The manifest interpreter.
///
/// One engine evaluates one manifest file; `include` runs in the same
/// engine, `subninja` runs a child engine that snapshots the scope and
/// shares the [`Context`].
pub struct Engine {
    variables: IndexMap<SmolStr, String>,
    auto_presets: IndexMap<SmolStr, AutoPreset>,
    rules: IndexMap<SmolStr, Rule>,
    transformers: IndexMap<SmolStr, String>,
    excluded_dirs: BTreeSet<String>,
    /// Prepended to every path parsed from the current manifest.
    rel_path: String,
    context: Rc<RefCell<Context>>,
    output: Vec<String>,
    filename: String,
    current_line: String,
    current_line_no: usize,
    rules_were_added: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            variables: IndexMap::new(),
            auto_presets: IndexMap::new(),
            rules: IndexMap::new(),
            transformers: IndexMap::new(),
            excluded_dirs: BTreeSet::new(),
            rel_path: String::new(),
            context: Rc::new(RefCell::new(Context::default())),
            output: Vec::new(),
            filename: String::new(),
            current_line: String::new(),
            current_line_no: 0,
            rules_were_added: false,
        }
    }

    /// A child engine for `subninja`: copies the scope, shares the context.
    fn child(&self) -> Self {
        Self {
            variables: self.variables.clone(),
            auto_presets: self.auto_presets.clone(),
            rules: self.rules.clone(),
            transformers: self.transformers.clone(),
            excluded_dirs: self.excluded_dirs.clone(),
            rel_path: self.rel_path.clone(),
            context: Rc::clone(&self.context),
            output: Vec::new(),
            filename: String::new(),
            current_line: String::new(),
            current_line_no: 0,
            rules_were_added: false,
        }
    }

    /// Load and evaluate a manifest file.
    pub fn load(&mut self, filename: &str) -> Result<(), Error> {
        debug!("loading manifest {filename}");
        self.filename = filename.to_string();
        self.rel_path = finder::rel_dir(filename);
        self.output
            .push(format!("# generated with love by buildfox from {filename}"));
        self.write_rel_path()?;
        let text = fs::read_to_string(filename)?;
        let statements = parser::parse(&text, filename)?;
        self.run_statements(&statements)
    }

    /// Load the bundled core definitions.
    pub fn load_core(&mut self, fox_core: &str) -> Result<(), Error> {
        self.filename = "fox_core.fox".to_string();
        self.rel_path = String::new();
        self.write_rel_path()?;
        let statements = parser::parse(fox_core, "fox_core.fox")?;
        self.run_statements(&statements)
    }

    /// Evaluate manifest text directly, without touching the filesystem for
    /// the manifest itself.
    pub fn load_text(&mut self, text: &str, filename: &str) -> Result<(), Error> {
        self.filename = filename.to_string();
        let statements = parser::parse(text, filename)?;
        self.run_statements(&statements)
    }

    /// Assign a variable as if the manifest did it, e.g. for command-line
    /// presets.
    pub fn assign(&mut self, name: &str, value: &str) -> Result<(), Error> {
        self.on_assign(&Assign {
            name: name.to_string(),
            value: value.to_string(),
            op: AssignOp::Set,
        })
    }

    /// The accumulated output text.
    pub fn text(&self) -> String {
        format!("{}\n", self.output.join("\n"))
    }

    /// Write the output to a file, or to stdout when no path is given.
    pub fn save(&self, filename: Option<&Path>) -> Result<(), Error> {
        match filename {
            Some(path) => fs::write(path, self.text())?,
            None => print!("{}", self.text()),
        }
        Ok(())
    }

    fn run_statements(&mut self, statements: &[Statement]) -> Result<(), Error> {
        for stmt in statements {
            self.current_line = stmt.line.clone();
            self.current_line_no = stmt.line_no;
            match &stmt.kind {
                StatementKind::Assign(assign) => self.on_assign(assign)?,
                StatementKind::Rule { name, assigns } => self.on_rule(name, assigns)?,
                StatementKind::Build(build) => self.on_build(build)?,
                StatementKind::Default { paths } => self.on_default(paths)?,
                StatementKind::Pool { name, assigns } => self.on_pool(name, assigns)?,
                StatementKind::Filter { predicates, assigns } => {
                    self.on_filter(predicates, assigns)?
                }
                StatementKind::Auto {
                    outputs,
                    rule,
                    inputs,
                    assigns,
                } => self.on_auto(outputs, rule, inputs, assigns),
                StatementKind::Include { path } => self.on_include(path)?,
                StatementKind::Subninja { path } => self.on_subninja(path)?,
                StatementKind::Transform { target, template } => {
                    self.on_transform(target, template)
                }
                StatementKind::Print { text } => println!("{}", self.eval(text)),
                StatementKind::Comment(text) => self.output.push(format!("#{text}")),
                StatementKind::Blank(count) => self
                    .output
                    .extend(std::iter::repeat_n(String::new(), *count)),
            }
        }
        Ok(())
    }

    // ---- evaluation primitives ----

    /// Substitute `$name` / `${name}` references and collapse escapes.
    fn eval(&self, text: &str) -> String {
        self.eval_local(text, &LocalScope::new())
    }

    fn eval_local(&self, text: &str, local_scope: &LocalScope) -> String {
        let raw = text.starts_with("r\"");
        let mut text = if raw {
            text.to_string()
        } else {
            emit::unescape_base(text)
        };
        if text.contains('$') {
            text = self.substitute_vars(&text, local_scope);
            if !raw {
                text = text.replace("$$", "$");
            }
        }
        text
    }

    /// Replace `$name` and `${name}` where the reference is preceded by an
    /// even run of dollars. Unknown names stay as written; substituted
    /// values are not rescanned.
    fn substitute_vars(&self, text: &str, local_scope: &LocalScope) -> String {
        let bytes = text.as_bytes();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b'$' {
                let c = text[i..].chars().next().unwrap();
                out.push(c);
                i += c.len_utf8();
                continue;
            }
            let start = i;
            while i < bytes.len() && bytes[i] == b'$' {
                i += 1;
            }
            let run = i - start;
            let reference = if run % 2 == 1 {
                read_var_name(text, i)
            } else {
                None
            };
            match reference {
                Some((name, consumed)) => {
                    let value = local_scope
                        .get(name)
                        .or_else(|| self.variables.get(name));
                    match value {
                        Some(value) => {
                            // the even prefix pairs stay in place
                            out.push_str(&text[start..i - 1]);
                            out.push_str(value);
                        }
                        None => out.push_str(&text[start..i + consumed]),
                    }
                    i += consumed;
                }
                None => out.push_str(&text[start..i]),
            }
        }
        out
    }

    /// Apply path transforms (`name(arg)`) and then evaluate.
    fn eval_path_transform(&self, value: &str) -> Result<String, Error> {
        if value.starts_with("r\"") {
            return Ok(value.to_string());
        }
        let mut value = value.to_string();
        if value.contains('(') {
            let call = RE_PATH_TRANSFORM.captures(&value)?.map(|caps| {
                (
                    caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
                    caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
                )
            });
            if let Some((name, arg)) = call {
                value = self.eval_transform(&name, &arg, false, &LocalScope::new());
            }
        }
        Ok(self.eval(&value))
    }

    /// Apply a transformer template to each space-separated token of
    /// `values`. An undeclared transformer name passes the values through.
    fn eval_transform(
        &self,
        name: &str,
        values: &str,
        do_eval: bool,
        local_scope: &LocalScope,
    ) -> String {
        let Some(template) = self.transformers.get(name) else {
            return if do_eval {
                self.eval_local(values, local_scope)
            } else {
                values.to_string()
            };
        };
        let transformed: Vec<String> = emit::split_non_escaped_spaces(values)
            .iter()
            .map(|token| {
                if token.is_empty() {
                    return String::new();
                }
                let (path, file) = match token.rsplit_once('/') {
                    Some((dir, file)) => (format!("{dir}/"), file),
                    None => (String::new(), token.as_str()),
                };
                let substituted = apply_subst_template(template, token, &path, file);
                if do_eval {
                    self.eval_local(&substituted, local_scope)
                } else {
                    substituted
                }
            })
            .collect();
        transformed.join(" ")
    }

    fn eval_assign_op(
        &self,
        value: &str,
        prev: Option<&str>,
        op: AssignOp,
    ) -> Result<String, Error> {
        if matches!(op, AssignOp::Append | AssignOp::Subtract) && prev.is_none() {
            return Err(Error::UndeclaredVariable {
                line: self.current_line.clone(),
                file: self.filename.clone(),
                line_no: self.current_line_no,
            });
        }
        Ok(match op {
            AssignOp::Set => value.to_string(),
            AssignOp::Append => format!("{}{}", prev.unwrap_or(""), value),
            AssignOp::Subtract => {
                let prev = prev.unwrap_or("");
                if prev.contains(value) {
                    prev.replacen(value, "", 1)
                } else {
                    prev.replacen(value.trim(), "", 1)
                }
            }
        })
    }

    /// Evaluate patterns and resolve them against the filesystem and the
    /// generated registry.
    fn eval_find_files(
        &self,
        inputs: &[String],
        outputs: Option<&[String]>,
    ) -> Result<(Vec<String>, Vec<String>), Error> {
        let inputs: Vec<String> = inputs
            .iter()
            .map(|i| self.eval_path_transform(i))
            .collect::<Result<_, _>>()?;
        let outputs: Option<Vec<String>> = outputs
            .map(|outputs| {
                outputs
                    .iter()
                    .map(|o| self.eval_path_transform(o))
                    .collect::<Result<_, _>>()
            })
            .transpose()?;
        let context = self.context.borrow();
        let (resolved_inputs, resolved_outputs) = finder::find_files(
            Some(inputs.as_slice()),
            outputs.as_deref(),
            &self.rel_path,
            &context.generated,
            &self.excluded_dirs,
        )?;
        Ok((
            resolved_inputs.unwrap_or_default(),
            resolved_outputs.unwrap_or_default(),
        ))
    }

    fn add_files(&self, files: &[String]) {
        let mut context = self.context.borrow_mut();
        for file in files {
            let (dir, name) = split_dir_name(file);
            context.all_files.entry(dir).or_default().insert(name);
        }
    }

    fn add_generated_files(&self, files: &[String]) -> Result<(), Error> {
        let mut context = self.context.borrow_mut();
        for file in files {
            let (dir, name) = split_dir_name(file);
            if !context.generated.entry(dir).or_default().insert(name) {
                return Err(Error::DuplicateTarget {
                    target: file.clone(),
                    line: self.current_line.clone(),
                    file: self.filename.clone(),
                    line_no: self.current_line_no,
                });
            }
        }
        Ok(())
    }

    // ---- statement handlers ----

    fn on_assign(&mut self, assign: &Assign) -> Result<(), Error> {
        let name = self.eval(&assign.name);
        let value = self.eval_transform(&name, &assign.value, true, &LocalScope::new());
        let prev = self.variables.get(name.as_str()).cloned();
        let value = self.eval_assign_op(&value, prev.as_deref(), assign.op)?;

        if name == "buildfox_required_version" {
            // check immediately to fail fast
            version::version_check(&value)?;
        } else if name == "excluded_dirs" {
            self.excluded_dirs = emit::split_non_escaped_spaces(&value).into_iter().collect();
        }

        self.output
            .push(format!("{} = {}", name, emit::escape_simple(&value)));
        self.variables.insert(SmolStr::new(&name), value);
        Ok(())
    }

    fn write_rel_path(&mut self) -> Result<(), Error> {
        let rel_path = self.rel_path.clone();
        self.assign("rel_path", &rel_path)
    }

    fn on_rule(&mut self, name: &str, assigns: &[Assign]) -> Result<(), Error> {
        self.rules_were_added = true;
        let rule_name = self.eval(name);
        self.output.push(format!("rule {rule_name}"));
        let mut vars = IndexMap::new();
        for assign in assigns {
            // values pass through raw: ninja evaluates rule variables itself
            let var_name = self.eval(&assign.name);
            if assign.op != AssignOp::Set {
                // += and -= are not native ninja features and rule nested
                // variables are evaluated by ninja, so they cannot work here
                return Err(Error::InvalidRuleAssignOp {
                    op: assign.op.as_str().to_string(),
                    line: self.current_line.clone(),
                    file: self.filename.clone(),
                    line_no: self.current_line_no,
                });
            }
            vars.insert(SmolStr::new(&var_name), assign.value.clone());
            if var_name != "expand" {
                self.output
                    .push(format!("  {} = {}", var_name, assign.value));
            }
        }
        self.rules.insert(SmolStr::new(&rule_name), Rule { vars });
        Ok(())
    }

    fn on_build(&mut self, build: &BuildStmt) -> Result<(), Error> {
        let (inputs_explicit, targets_explicit) = self
            .eval_find_files(&build.inputs_explicit, Some(build.targets_explicit.as_slice()))?;
        let (targets_implicit, _) = self.eval_find_files(&build.targets_implicit, None)?;
        let rule_name = self.eval(&build.rule);
        let (inputs_implicit, _) = self.eval_find_files(&build.inputs_implicit, None)?;
        let (inputs_order, _) = self.eval_find_files(&build.inputs_order, None)?;

        self.add_files(&inputs_explicit);
        self.add_files(&inputs_implicit);
        self.add_files(&inputs_order);
        self.add_files(&targets_explicit);
        self.add_files(&targets_implicit);
        self.add_generated_files(&targets_explicit)?;
        self.add_generated_files(&targets_implicit)?;

        let (rule_name, assigns) = if rule_name == "auto" {
            let (deduced, preset_assigns) =
                self.eval_auto(&inputs_explicit, &targets_explicit)?;
            let mut assigns = preset_assigns;
            assigns.extend(build.assigns.iter().cloned());
            (deduced, assigns)
        } else {
            (rule_name, build.assigns.clone())
        };

        if rule_name != "phony" && !self.rules.contains_key(rule_name.as_str()) {
            let available = self
                .rules
                .keys()
                .map(SmolStr::as_str)
                .chain(["auto", "phony"])
                .collect::<Vec<_>>()
                .join(" ");
            return Err(Error::UnknownRule {
                rule: rule_name,
                available,
                line: self.current_line.clone(),
                file: self.filename.clone(),
                line_no: self.current_line_no,
            });
        }

        let mut local_scope = LocalScope::new();
        add_target_info(&mut local_scope, "inputs_explicit", &inputs_explicit);
        add_target_info(&mut local_scope, "inputs_implicit", &inputs_implicit);
        add_target_info(&mut local_scope, "inputs_order", &inputs_order);
        add_target_info(&mut local_scope, "targets_explicit", &targets_explicit);
        add_target_info(&mut local_scope, "targets_implicit", &targets_implicit);

        // you probably want to match some files
        for (patterns, resolved, kind) in [
            (&build.inputs_explicit, &inputs_explicit, "explicit"),
            (&build.inputs_implicit, &inputs_implicit, "implicit"),
            (&build.inputs_order, &inputs_order, "order-only"),
        ] {
            if !patterns.is_empty() && resolved.is_empty() {
                warn!(
                    "no {kind} input files matched for '{}' ({}:{})",
                    self.current_line, self.filename, self.current_line_no
                );
            }
        }

        let expand = self
            .rules
            .get(rule_name.as_str())
            .and_then(|rule| rule.vars.get("expand"))
            .is_some_and(|v| !v.is_empty());

        if expand {
            if targets_explicit.len() != inputs_explicit.len() {
                return Err(Error::ExpandArityMismatch {
                    rule: rule_name,
                    line: self.current_line.clone(),
                    file: self.filename.clone(),
                    line_no: self.current_line_no,
                });
            }
            for (target, input) in targets_explicit.iter().zip(&inputs_explicit) {
                let mut line = format!(
                    "build {}: {} {}",
                    emit::escape(target),
                    rule_name,
                    emit::escape(input)
                );
                if !inputs_implicit.is_empty() {
                    line.push_str(&format!(" | {}", emit::escape_join(&inputs_implicit)));
                }
                if !inputs_order.is_empty() {
                    line.push_str(&format!(" || {}", emit::escape_join(&inputs_order)));
                }
                self.output.push(line);
                self.write_assigns(&assigns, &mut local_scope)?;
            }
        } else {
            let mut line = format!(
                "build {}: {}",
                emit::escape_join(&targets_explicit),
                rule_name
            );
            if !inputs_explicit.is_empty() {
                line.push_str(&format!(" {}", emit::escape_join(&inputs_explicit)));
            }
            if !inputs_implicit.is_empty() {
                line.push_str(&format!(" | {}", emit::escape_join(&inputs_implicit)));
            }
            if !inputs_order.is_empty() {
                line.push_str(&format!(" || {}", emit::escape_join(&inputs_order)));
            }
            self.output.push(line);
            self.write_assigns(&assigns, &mut local_scope)?;
        }

        if !targets_implicit.is_empty() {
            // ninja cannot declare implicit outputs before 1.7, so alias
            // them through a phony edge
            self.output.push(format!(
                "build {}: phony {}",
                emit::escape_join(&targets_implicit),
                emit::escape_join(&targets_explicit)
            ));
        }

        Ok(())
    }

    fn write_assigns(
        &mut self,
        assigns: &[Assign],
        local_scope: &mut LocalScope,
    ) -> Result<(), Error> {
        for assign in assigns {
            let name = self.eval(&assign.name);
            let value = self.eval_transform(&name, &assign.value, true, local_scope);
            let prev = local_scope
                .get(name.as_str())
                .or_else(|| self.variables.get(name.as_str()))
                .cloned();
            let value = self.eval_assign_op(&value, prev.as_deref(), assign.op)?;
            self.output
                .push(format!("  {} = {}", name, emit::escape_simple(&value)));
            local_scope.insert(SmolStr::new(&name), value);
        }
        Ok(())
    }

    /// Find the first auto preset whose input and output patterns all match.
    fn eval_auto(
        &self,
        inputs: &[String],
        outputs: &[String],
    ) -> Result<(String, Vec<Assign>), Error> {
        'preset: for (rule_name, preset) in &self.auto_presets {
            for auto_input in &preset.inputs {
                if !self.all_match(auto_input, inputs)? {
                    continue 'preset;
                }
            }
            for auto_output in &preset.outputs {
                if !self.all_match(auto_output, outputs)? {
                    continue 'preset;
                }
            }
            return Ok((rule_name.to_string(), preset.assigns.clone()));
        }
        Err(Error::AutoDeduceFailed {
            line: self.current_line.clone(),
            file: self.filename.clone(),
            line_no: self.current_line_no,
        })
    }

    fn all_match(&self, auto_pattern: &str, files: &[String]) -> Result<bool, Error> {
        match pattern::match_regex(auto_pattern, &mut BTreeSet::new()) {
            Some(regex_text) => {
                let regex = pattern::compile(&regex_text)?;
                for file in files {
                    if !regex.is_match(file)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            None => Ok(files.iter().all(|file| file == auto_pattern)),
        }
    }

    fn on_default(&mut self, paths: &[String]) -> Result<(), Error> {
        let (paths, _) = self.eval_find_files(paths, None)?;
        self.output
            .push(format!("default {}", emit::escape_join(&paths)));
        Ok(())
    }

    fn on_pool(&mut self, name: &str, assigns: &[Assign]) -> Result<(), Error> {
        let name = self.eval(name);
        self.output.push(format!("pool {name}"));
        self.write_assigns(assigns, &mut LocalScope::new())
    }

    /// Evaluate filter predicates against global variables; when they all
    /// hold, apply the nested assignments globally.
    fn on_filter(
        &mut self,
        predicates: &[(String, String)],
        assigns: &[Assign],
    ) -> Result<(), Error> {
        let nested_names: Vec<String> =
            assigns.iter().map(|assign| self.eval(&assign.name)).collect();
        for (name_expr, value_expr) in predicates {
            let name = self.eval(name_expr);
            if nested_names.contains(&name) {
                return Err(Error::FilterOnNestedVariable {
                    name,
                    line: self.current_line.clone(),
                    file: self.filename.clone(),
                    line_no: self.current_line_no,
                });
            }
            let value = self.eval(value_expr);
            if !self.eval_filter(&name, &value)? {
                return Ok(());
            }
        }
        for assign in assigns {
            self.on_assign(assign)?;
        }
        Ok(())
    }

    fn eval_filter(&self, name: &str, regex_or_value: &str) -> Result<bool, Error> {
        let current = self
            .variables
            .get(name)
            .map(String::as_str)
            .unwrap_or("");
        match pattern::match_regex(regex_or_value, &mut BTreeSet::new()) {
            Some(regex_text) => Ok(pattern::compile(&regex_text)?.is_match(current)?),
            None => Ok(regex_or_value == current),
        }
    }

    fn on_auto(&mut self, outputs: &[String], rule: &str, inputs: &[String], assigns: &[Assign]) {
        // patterns are stored evaluated but unresolved: they match against
        // resolved build files later
        let outputs = outputs.iter().map(|o| self.eval(o)).collect();
        let name = self.eval(rule);
        let inputs = inputs.iter().map(|i| self.eval(i)).collect();
        self.auto_presets.insert(
            SmolStr::new(&name),
            AutoPreset {
                inputs,
                outputs,
                assigns: assigns.to_vec(),
            },
        );
    }

    fn on_transform(&mut self, target: &str, template: &str) {
        // the template stays raw until application
        let target = self.eval(target);
        self.transformers
            .insert(SmolStr::new(&target), template.to_string());
    }

    fn on_include(&mut self, path: &str) -> Result<(), Error> {
        let (paths, _) = self.eval_find_files(&[path.to_string()], None)?;
        for path in paths {
            debug!("including {path}");
            let old_rel_path = std::mem::replace(&mut self.rel_path, finder::rel_dir(&path));
            let old_filename = self.filename.clone();
            self.write_rel_path()?;
            let text = fs::read_to_string(&path)?;
            let statements = parser::parse(&text, &path)?;
            self.filename = path;
            self.run_statements(&statements)?;
            self.filename = old_filename;
            self.rel_path = old_rel_path;
        }
        Ok(())
    }

    fn on_subninja(&mut self, path: &str) -> Result<(), Error> {
        let (paths, _) = self.eval_find_files(&[path.to_string()], None)?;
        for path in paths {
            let stem = Path::new(&path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let slug: String = stem
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            let num = {
                let mut context = self.context.borrow_mut();
                let num = context.subninja_num;
                context.subninja_num += 1;
                num
            };
            let gen_filename = format!("__gen_{num}_{slug}.ninja");
            debug!("generating subninja {gen_filename} from {path}");

            let mut child = self.child();
            child.load(&path)?;
            child.save(Some(Path::new(&gen_filename)))?;

            if child.rules_were_added {
                // scoped rules only work from ninja 1.6 on
                self.assign("ninja_required_version", "1.6")?;
            }
            self.rules_were_added |= child.rules_were_added;
            self.output
                .push(format!("subninja {}", emit::escape(&gen_filename)));
        }
        Ok(())
    }
}

fn split_dir_name(file: &str) -> (String, String) {
    match file.rsplit_once('/') {
        Some((dir, name)) => (format!("{dir}/"), name.to_string()),
        None => ("./".to_string(), file.to_string()),
    }
}

fn add_target_info(scope: &mut LocalScope, prefix: &str, files: &[String]) {
    for (index, file) in files.iter().enumerate() {
        let (path, name) = file.rsplit_once('/').unwrap_or(("", file.as_str()));
        scope.insert(SmolStr::new(format!("{prefix}_path_{index}")), path.to_string());
        scope.insert(SmolStr::new(format!("{prefix}_name_{index}")), name.to_string());
    }
}

/// Read a `name` or `{name}` variable reference at byte offset `i`.
/// Returns the name and the number of bytes consumed.
///
/// A bare reference stops at the first character outside `[A-Za-z0-9_]`, so
/// `$x-bar` reads the variable `x`; the braced form also accepts `.` and
/// `-` in the name.
fn read_var_name(text: &str, i: usize) -> Option<(&str, usize)> {
    let bytes = text.as_bytes();
    if bytes.get(i) == Some(&b'{') {
        let is_name_char =
            |b: u8| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-');
        let mut j = i + 1;
        while j < bytes.len() && is_name_char(bytes[j]) {
            j += 1;
        }
        if j > i + 1 && bytes.get(j) == Some(&b'}') {
            return Some((&text[i + 1..j], j + 1 - i));
        }
        None
    } else {
        let mut j = i;
        while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
            j += 1;
        }
        if j > i {
            return Some((&text[i..j], j - i));
        }
        None
    }
}

/// Replace `${param}`, `${path}` and `${file}` (each preceded by an even
/// dollar run, which gets consumed) with the token parts.
fn apply_subst_template(template: &str, param: &str, path: &str, file: &str) -> String {
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            let c = template[i..].chars().next().unwrap();
            out.push(c);
            i += c.len_utf8();
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i] == b'$' {
            i += 1;
        }
        let run = i - start;
        let mut replaced = false;
        if run % 2 == 1 {
            for (key, value) in [("{param}", param), ("{path}", path), ("{file}", file)] {
                if template[i..].starts_with(key) {
                    out.push_str(value);
                    i += key.len();
                    replaced = true;
                    break;
                }
            }
        }
        if !replaced {
            out.push_str(&template[start..i]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(vars: &[(&str, &str)]) -> Engine {
        let mut engine = Engine::new();
        for (name, value) in vars {
            engine.variables.insert(SmolStr::new(*name), value.to_string());
        }
        engine
    }

    #[test]
    fn substitution_prefers_local_scope() {
        let engine = engine_with(&[("x", "global")]);
        let mut local = LocalScope::new();
        local.insert(SmolStr::new("x"), "local".to_string());
        assert_eq!(engine.eval_local("$x", &local), "local");
        assert_eq!(engine.eval("$x"), "global");
    }

    #[test]
    fn substitution_honors_dollar_parity() {
        let engine = engine_with(&[("x", "v")]);
        assert_eq!(engine.eval("$x"), "v");
        assert_eq!(engine.eval("$$x"), "$x");
        assert_eq!(engine.eval("$$$x"), "$v");
        assert_eq!(engine.eval("${x}-suffix"), "v-suffix");
    }

    #[test]
    fn unknown_variable_stays_as_written() {
        let engine = engine_with(&[]);
        assert_eq!(engine.eval("$missing"), "$missing");
        assert_eq!(engine.eval("${missing}"), "${missing}");
    }

    #[test]
    fn raw_literal_keeps_escapes() {
        let engine = engine_with(&[("x", "v")]);
        assert_eq!(engine.eval("r\"$$x\""), "r\"$$x\"");
        assert_eq!(engine.eval("r\"$x\""), "r\"v\"");
    }

    #[test]
    fn transformer_identity_template() {
        let mut engine = engine_with(&[]);
        engine.on_transform("id", "${param}");
        assert_eq!(
            engine.eval_transform("id", "a b/c.txt", true, &LocalScope::new()),
            "a b/c.txt"
        );
    }

    #[test]
    fn transformer_splits_path_and_file() {
        let mut engine = engine_with(&[]);
        engine.on_transform("objects", "${path}obj_${file}.o");
        assert_eq!(
            engine.eval_transform("objects", "src/main.c", true, &LocalScope::new()),
            "src/obj_main.c.o"
        );
        assert_eq!(
            engine.eval_transform("objects", "main.c", true, &LocalScope::new()),
            "obj_main.c.o"
        );
    }

    #[test]
    fn path_transform_applies_declared_transformer() {
        let mut engine = engine_with(&[]);
        engine.on_transform("objects", "${path}${file}.o");
        assert_eq!(
            engine.eval_path_transform("objects(src/a.c)").unwrap(),
            "src/a.c.o"
        );
        // unknown transformer names strip down to the argument
        assert_eq!(engine.eval_path_transform("unknown(a.c)").unwrap(), "a.c");
    }

    #[test]
    fn assign_op_append_and_subtract() {
        let engine = engine_with(&[]);
        assert_eq!(
            engine.eval_assign_op(" -g", Some("-Wall"), AssignOp::Append).unwrap(),
            "-Wall -g"
        );
        assert_eq!(
            engine
                .eval_assign_op(" -g", Some("-Wall -g"), AssignOp::Subtract)
                .unwrap(),
            "-Wall"
        );
        // falls back to the stripped form, and missing values are a no-op
        assert_eq!(
            engine
                .eval_assign_op(" -g ", Some("x -g"), AssignOp::Subtract)
                .unwrap(),
            "x "
        );
        assert_eq!(
            engine
                .eval_assign_op("-O2", Some("-Wall"), AssignOp::Subtract)
                .unwrap(),
            "-Wall"
        );
    }

    #[test]
    fn assign_op_requires_declared_variable() {
        let engine = engine_with(&[]);
        assert!(matches!(
            engine.eval_assign_op("x", None, AssignOp::Append),
            Err(Error::UndeclaredVariable { .. })
        ));
    }

    #[test]
    fn filter_matches_literal_and_wildcard() {
        let engine = engine_with(&[("toolset", "msvc")]);
        assert!(engine.eval_filter("toolset", "msvc").unwrap());
        assert!(!engine.eval_filter("toolset", "gcc").unwrap());
        assert!(engine.eval_filter("toolset", "ms*").unwrap());
        assert!(!engine.eval_filter("missing", "msvc").unwrap());
    }
}

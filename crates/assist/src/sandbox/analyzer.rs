//! Static risk analysis of Python snippets.
//!
//! Nothing here executes the snippet. The source is parsed into a syntax tree and
//! walked in source order; the first disallowed construct decides the verdict.
//! When the parser rejects the source the raw text is scanned for the same
//! families so the reason is specific, and anything else is denied as unparseable.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use rustpython_parser::{Parse, ast};
use thiserror::Error;

use super::ExecutionRequest;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    ProcessSpawn,
    Network,
    Filesystem,
    Reflection,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProcessSpawn => "process control",
            Self::Network => "network access",
            Self::Filesystem => "filesystem access",
            Self::Reflection => "interpreter internals",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("unparseable: {0}")]
    Unparseable(String),
    #[error("import of `{module}` is not allowed ({capability})")]
    DeniedModule {
        module: String,
        capability: Capability,
    },
    #[error("relative imports are not allowed")]
    RelativeImport,
    #[error("call to `{0}` is not allowed (dynamic code execution)")]
    DynamicCode(String),
    #[error("access to `{0}` is not allowed (reflection)")]
    Reflection(String),
    #[error("writing to {0} is not allowed outside the scratch directory")]
    FilesystemWrite(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// A request that passed analysis. Only [`StaticAnalyzer::approve`] can build one,
/// which is what keeps unvetted code away from every executor.
#[derive(Clone, Debug)]
pub struct ApprovedRequest {
    request: ExecutionRequest,
}

impl ApprovedRequest {
    pub fn source(&self) -> &str {
        &self.request.source_code
    }

    pub fn request(&self) -> &ExecutionRequest {
        &self.request
    }

    /// Skips analysis so the runtime guards can be exercised on their own.
    #[cfg(test)]
    pub(crate) fn unchecked(request: ExecutionRequest) -> Self {
        Self { request }
    }
}

const DENIED_MODULES: &[(&str, Capability)] = &[
    ("os", Capability::ProcessSpawn),
    ("posix", Capability::ProcessSpawn),
    ("nt", Capability::ProcessSpawn),
    ("subprocess", Capability::ProcessSpawn),
    ("multiprocessing", Capability::ProcessSpawn),
    ("pty", Capability::ProcessSpawn),
    ("signal", Capability::ProcessSpawn),
    ("asyncio", Capability::ProcessSpawn),
    ("threading", Capability::ProcessSpawn),
    ("_thread", Capability::ProcessSpawn),
    ("_posixsubprocess", Capability::ProcessSpawn),
    ("resource", Capability::ProcessSpawn),
    ("platform", Capability::ProcessSpawn),
    ("socket", Capability::Network),
    ("ssl", Capability::Network),
    ("http", Capability::Network),
    ("urllib", Capability::Network),
    ("requests", Capability::Network),
    ("ftplib", Capability::Network),
    ("smtplib", Capability::Network),
    ("telnetlib", Capability::Network),
    ("webbrowser", Capability::Network),
    ("select", Capability::Network),
    ("selectors", Capability::Network),
    ("socketserver", Capability::Network),
    ("xmlrpc", Capability::Network),
    ("imaplib", Capability::Network),
    ("poplib", Capability::Network),
    ("_socket", Capability::Network),
    ("_ssl", Capability::Network),
    ("shutil", Capability::Filesystem),
    ("pathlib", Capability::Filesystem),
    ("tempfile", Capability::Filesystem),
    ("glob", Capability::Filesystem),
    ("io", Capability::Filesystem),
    ("_io", Capability::Filesystem),
    ("codecs", Capability::Filesystem),
    ("fileinput", Capability::Filesystem),
    ("zipfile", Capability::Filesystem),
    ("tarfile", Capability::Filesystem),
    ("shelve", Capability::Filesystem),
    ("dbm", Capability::Filesystem),
    ("sqlite3", Capability::Filesystem),
    ("mmap", Capability::Filesystem),
    ("fcntl", Capability::Filesystem),
    ("logging", Capability::Filesystem),
    ("sys", Capability::Reflection),
    ("builtins", Capability::Reflection),
    ("importlib", Capability::Reflection),
    ("ctypes", Capability::Reflection),
    ("inspect", Capability::Reflection),
    ("gc", Capability::Reflection),
    ("code", Capability::Reflection),
    ("pickle", Capability::Reflection),
    ("marshal", Capability::Reflection),
    ("_ctypes", Capability::Reflection),
    ("runpy", Capability::Reflection),
    ("pydoc", Capability::Reflection),
    ("site", Capability::Reflection),
    ("zipimport", Capability::Reflection),
];

/// Underscore-prefixed roots are interpreter internals and denied wholesale;
/// this one is the exception.
const ALLOWED_PRIVATE_MODULES: &[&str] = &["__future__"];

const DENIED_CALLS: &[&str] = &[
    "exec",
    "eval",
    "compile",
    "__import__",
    "breakpoint",
    "globals",
    "locals",
    "vars",
];

/// Non-dunder attributes that reach frames, code objects or arbitrary
/// attribute lookup. Every dunder outside [`ALLOWED_DUNDERS`] is denied too.
const DENIED_ATTRIBUTES: &[&str] = &[
    "gi_frame",
    "gi_code",
    "cr_frame",
    "cr_code",
    "ag_frame",
    "ag_code",
    "f_back",
    "f_globals",
    "f_locals",
    "f_builtins",
    "f_code",
    "tb_frame",
    "tb_next",
    "co_code",
    "attrgetter",
    "methodcaller",
    "get_field",
];

const ALLOWED_DUNDERS: &[&str] = &[
    "__name__",
    "__qualname__",
    "__doc__",
    "__module__",
    "__main__",
    "__debug__",
    "__init__",
    "__len__",
    "__iter__",
    "__next__",
    "__enter__",
    "__exit__",
    "__str__",
    "__repr__",
    "__eq__",
    "__hash__",
    "__contains__",
    "__getitem__",
    "__setitem__",
];

/// Attribute names under which other modules commonly re-export a denied one
/// (`random._os`, `logging.sys`).
const MODULE_HANDLES: &[&str] = &[
    "os",
    "sys",
    "posix",
    "nt",
    "subprocess",
    "builtins",
    "importlib",
    "ctypes",
    "socket",
    "shutil",
];

const ATTRIBUTE_BUILTINS: &[&str] = &["getattr", "setattr", "delattr"];

#[derive(Clone, Debug)]
pub struct AnalyzerPolicy {
    denied_modules: BTreeMap<String, Capability>,
    denied_calls: BTreeSet<String>,
    denied_attributes: BTreeSet<String>,
}

impl Default for AnalyzerPolicy {
    fn default() -> Self {
        Self {
            denied_modules: DENIED_MODULES
                .iter()
                .map(|(name, capability)| ((*name).to_owned(), *capability))
                .collect(),
            denied_calls: DENIED_CALLS.iter().map(|name| (*name).to_owned()).collect(),
            denied_attributes: DENIED_ATTRIBUTES
                .iter()
                .map(|name| (*name).to_owned())
                .collect(),
        }
    }
}

impl AnalyzerPolicy {
    pub fn with_denied_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for module in modules {
            self.denied_modules
                .insert(module.into(), Capability::Reflection);
        }
        self
    }

    /// Root package names the runtime import guard should also refuse.
    pub fn denied_module_names(&self) -> impl Iterator<Item = &str> {
        self.denied_modules.keys().map(String::as_str)
    }

    fn module_verdict(&self, dotted: &str) -> Result<(), DenyReason> {
        let root = dotted.split('.').next().unwrap_or(dotted);
        let capability = match self.denied_modules.get(root) {
            Some(capability) => *capability,
            None if root.starts_with('_') && !ALLOWED_PRIVATE_MODULES.contains(&root) => {
                Capability::Reflection
            }
            None => return Ok(()),
        };
        Err(DenyReason::DeniedModule {
            module: root.to_owned(),
            capability,
        })
    }

    /// Applies to `obj.name`, `from module import name` and literal
    /// `getattr` names alike.
    fn attribute_verdict(&self, name: &str) -> Result<(), DenyReason> {
        if self.denied_attributes.contains(name)
            || (is_dunder(name) && !ALLOWED_DUNDERS.contains(&name))
        {
            return Err(DenyReason::Reflection(name.to_owned()));
        }
        let handle = name.trim_start_matches('_');
        let module = if name.starts_with('_') && self.denied_modules.contains_key(name) {
            Some(name)
        } else if MODULE_HANDLES.contains(&handle) {
            Some(handle)
        } else {
            None
        };
        if let Some(module) = module {
            return Err(DenyReason::DeniedModule {
                module: module.to_owned(),
                capability: self
                    .denied_modules
                    .get(module)
                    .copied()
                    .unwrap_or(Capability::Reflection),
            });
        }
        Ok(())
    }

    fn is_denied_name(&self, name: &str) -> bool {
        self.denied_calls.contains(name)
            || self.denied_modules.contains_key(name)
            || is_dunder(name)
            || self.attribute_verdict(name).is_err()
    }
}

#[derive(Clone, Debug, Default)]
pub struct StaticAnalyzer {
    policy: AnalyzerPolicy,
}

impl StaticAnalyzer {
    pub fn new(policy: AnalyzerPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AnalyzerPolicy {
        &self.policy
    }

    pub fn analyze(&self, source: &str) -> Verdict {
        let result = match ast::Suite::parse(source, "<snippet>") {
            Ok(suite) => Walker {
                policy: &self.policy,
            }
            .suite(&suite),
            Err(err) => Err(self
                .scan_raw(source)
                .unwrap_or_else(|| DenyReason::Unparseable(err.to_string()))),
        };
        match result {
            Ok(()) => Verdict::Allow,
            Err(reason) => Verdict::Deny(reason),
        }
    }

    pub fn approve(&self, request: ExecutionRequest) -> Result<ApprovedRequest, DenyReason> {
        match self.analyze(&request.source_code) {
            Verdict::Allow => Ok(ApprovedRequest { request }),
            Verdict::Deny(reason) => Err(reason),
        }
    }

    fn scan_raw(&self, source: &str) -> Option<DenyReason> {
        static IMPORT: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^\s*(?:import|from)\s+([A-Za-z_][\w.]*)").expect("regex")
        });
        static CALL: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\b([A-Za-z_]\w*)\s*\(").expect("regex"));
        static DUNDER: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\b(__[A-Za-z]\w*__)").expect("regex"));

        for line in source.lines() {
            for statement in line.split(';') {
                if let Some(cap) = IMPORT.captures(statement)
                    && let Err(reason) = self.policy.module_verdict(&cap[1])
                {
                    return Some(reason);
                }
            }
            for cap in CALL.captures_iter(line) {
                if self.policy.denied_calls.contains(&cap[1]) {
                    return Some(DenyReason::DynamicCode(cap[1].to_owned()));
                }
            }
            for cap in DUNDER.captures_iter(line) {
                if let Err(reason) = self.policy.attribute_verdict(&cap[1]) {
                    return Some(reason);
                }
            }
        }
        None
    }
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

struct Walker<'a> {
    policy: &'a AnalyzerPolicy,
}

type Check = Result<(), DenyReason>;

impl Walker<'_> {
    fn suite(&self, body: &[ast::Stmt]) -> Check {
        body.iter().try_for_each(|stmt| self.stmt(stmt))
    }

    fn exprs<'e>(&self, exprs: impl IntoIterator<Item = &'e ast::Expr>) -> Check {
        exprs.into_iter().try_for_each(|expr| self.expr(expr))
    }

    fn opt(&self, expr: Option<&ast::Expr>) -> Check {
        expr.map_or(Ok(()), |expr| self.expr(expr))
    }

    fn stmt(&self, stmt: &ast::Stmt) -> Check {
        match stmt {
            ast::Stmt::Import(ast::StmtImport { names, .. }) => names
                .iter()
                .try_for_each(|alias| self.policy.module_verdict(alias.name.as_str())),
            ast::Stmt::ImportFrom(ast::StmtImportFrom {
                module,
                names,
                level,
                ..
            }) => {
                if level.as_ref().is_some_and(|level| level.to_u32() > 0) {
                    return Err(DenyReason::RelativeImport);
                }
                let Some(module) = module else {
                    return Err(DenyReason::RelativeImport);
                };
                self.policy.module_verdict(module.as_str())?;
                names
                    .iter()
                    .filter(|alias| alias.name.as_str() != "*")
                    .try_for_each(|alias| self.policy.attribute_verdict(alias.name.as_str()))
            }
            ast::Stmt::FunctionDef(ast::StmtFunctionDef {
                args,
                body,
                decorator_list,
                returns,
                ..
            })
            | ast::Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef {
                args,
                body,
                decorator_list,
                returns,
                ..
            }) => {
                self.exprs(decorator_list)?;
                self.arguments(args)?;
                self.opt(returns.as_deref())?;
                self.suite(body)
            }
            ast::Stmt::ClassDef(ast::StmtClassDef {
                bases,
                keywords,
                body,
                decorator_list,
                ..
            }) => {
                self.exprs(decorator_list)?;
                self.exprs(bases)?;
                self.exprs(keywords.iter().map(|keyword| &keyword.value))?;
                self.suite(body)
            }
            ast::Stmt::Return(ast::StmtReturn { value, .. }) => self.opt(value.as_deref()),
            ast::Stmt::Delete(ast::StmtDelete { targets, .. }) => self.exprs(targets),
            ast::Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                self.exprs(targets)?;
                self.expr(value)
            }
            ast::Stmt::AugAssign(ast::StmtAugAssign { target, value, .. }) => {
                self.expr(target)?;
                self.expr(value)
            }
            ast::Stmt::AnnAssign(ast::StmtAnnAssign {
                target,
                annotation,
                value,
                ..
            }) => {
                self.expr(target)?;
                self.expr(annotation)?;
                self.opt(value.as_deref())
            }
            ast::Stmt::For(ast::StmtFor {
                target,
                iter,
                body,
                orelse,
                ..
            })
            | ast::Stmt::AsyncFor(ast::StmtAsyncFor {
                target,
                iter,
                body,
                orelse,
                ..
            }) => {
                self.expr(target)?;
                self.expr(iter)?;
                self.suite(body)?;
                self.suite(orelse)
            }
            ast::Stmt::While(ast::StmtWhile {
                test, body, orelse, ..
            })
            | ast::Stmt::If(ast::StmtIf {
                test, body, orelse, ..
            }) => {
                self.expr(test)?;
                self.suite(body)?;
                self.suite(orelse)
            }
            ast::Stmt::With(ast::StmtWith { items, body, .. })
            | ast::Stmt::AsyncWith(ast::StmtAsyncWith { items, body, .. }) => {
                for item in items {
                    self.expr(&item.context_expr)?;
                    self.opt(item.optional_vars.as_deref())?;
                }
                self.suite(body)
            }
            ast::Stmt::Match(ast::StmtMatch { subject, cases, .. }) => {
                self.expr(subject)?;
                for case in cases {
                    self.opt(case.guard.as_deref())?;
                    self.suite(&case.body)?;
                }
                Ok(())
            }
            ast::Stmt::Raise(ast::StmtRaise { exc, cause, .. }) => {
                self.opt(exc.as_deref())?;
                self.opt(cause.as_deref())
            }
            ast::Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            })
            | ast::Stmt::TryStar(ast::StmtTryStar {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            }) => {
                self.suite(body)?;
                for handler in handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    self.opt(handler.type_.as_deref())?;
                    self.suite(&handler.body)?;
                }
                self.suite(orelse)?;
                self.suite(finalbody)
            }
            ast::Stmt::Assert(ast::StmtAssert { test, msg, .. }) => {
                self.expr(test)?;
                self.opt(msg.as_deref())
            }
            ast::Stmt::Expr(ast::StmtExpr { value, .. }) => self.expr(value),
            _ => Ok(()),
        }
    }

    fn arguments(&self, args: &ast::Arguments) -> Check {
        for arg in args
            .posonlyargs
            .iter()
            .chain(&args.args)
            .chain(&args.kwonlyargs)
        {
            self.opt(arg.def.annotation.as_deref())?;
            self.opt(arg.default.as_deref())?;
        }
        for arg in args.vararg.iter().chain(args.kwarg.iter()) {
            self.opt(arg.annotation.as_deref())?;
        }
        Ok(())
    }

    fn comprehensions(&self, generators: &[ast::Comprehension]) -> Check {
        for generator in generators {
            self.expr(&generator.target)?;
            self.expr(&generator.iter)?;
            self.exprs(&generator.ifs)?;
        }
        Ok(())
    }

    fn expr(&self, expr: &ast::Expr) -> Check {
        match expr {
            // Names in call position go through `call` instead.
            ast::Expr::Name(ast::ExprName { id, .. }) => self.name(id.as_str()),
            ast::Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                self.policy.attribute_verdict(attr.as_str())?;
                self.expr(value)
            }
            ast::Expr::Call(ast::ExprCall {
                func,
                args,
                keywords,
                ..
            }) => {
                match func.as_ref() {
                    ast::Expr::Name(ast::ExprName { id, .. }) => {
                        self.call(id.as_str(), args, keywords)?;
                    }
                    func => self.expr(func)?,
                }
                self.exprs(args)?;
                self.exprs(keywords.iter().map(|keyword| &keyword.value))
            }
            ast::Expr::BoolOp(ast::ExprBoolOp { values, .. }) => self.exprs(values),
            ast::Expr::NamedExpr(ast::ExprNamedExpr { target, value, .. }) => {
                self.expr(target)?;
                self.expr(value)
            }
            ast::Expr::BinOp(ast::ExprBinOp { left, right, .. }) => {
                self.expr(left)?;
                self.expr(right)
            }
            ast::Expr::UnaryOp(ast::ExprUnaryOp { operand, .. }) => self.expr(operand),
            ast::Expr::Lambda(ast::ExprLambda { args, body, .. }) => {
                self.arguments(args)?;
                self.expr(body)
            }
            ast::Expr::IfExp(ast::ExprIfExp {
                test, body, orelse, ..
            }) => {
                self.expr(test)?;
                self.expr(body)?;
                self.expr(orelse)
            }
            ast::Expr::Dict(ast::ExprDict { keys, values, .. }) => {
                self.exprs(keys.iter().flatten())?;
                self.exprs(values)
            }
            ast::Expr::Set(ast::ExprSet { elts, .. })
            | ast::Expr::List(ast::ExprList { elts, .. })
            | ast::Expr::Tuple(ast::ExprTuple { elts, .. }) => self.exprs(elts),
            ast::Expr::ListComp(ast::ExprListComp {
                elt, generators, ..
            })
            | ast::Expr::SetComp(ast::ExprSetComp {
                elt, generators, ..
            })
            | ast::Expr::GeneratorExp(ast::ExprGeneratorExp {
                elt, generators, ..
            }) => {
                self.expr(elt)?;
                self.comprehensions(generators)
            }
            ast::Expr::DictComp(ast::ExprDictComp {
                key,
                value,
                generators,
                ..
            }) => {
                self.expr(key)?;
                self.expr(value)?;
                self.comprehensions(generators)
            }
            ast::Expr::Await(ast::ExprAwait { value, .. })
            | ast::Expr::YieldFrom(ast::ExprYieldFrom { value, .. })
            | ast::Expr::Starred(ast::ExprStarred { value, .. }) => self.expr(value),
            ast::Expr::Yield(ast::ExprYield { value, .. }) => self.opt(value.as_deref()),
            ast::Expr::Compare(ast::ExprCompare {
                left, comparators, ..
            }) => {
                self.expr(left)?;
                self.exprs(comparators)
            }
            ast::Expr::FormattedValue(ast::ExprFormattedValue {
                value, format_spec, ..
            }) => {
                self.expr(value)?;
                self.opt(format_spec.as_deref())
            }
            ast::Expr::JoinedStr(ast::ExprJoinedStr { values, .. }) => self.exprs(values),
            ast::Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                self.expr(value)?;
                self.expr(slice)
            }
            ast::Expr::Slice(ast::ExprSlice {
                lower, upper, step, ..
            }) => {
                self.opt(lower.as_deref())?;
                self.opt(upper.as_deref())?;
                self.opt(step.as_deref())
            }
            _ => Ok(()),
        }
    }

    fn name(&self, id: &str) -> Check {
        if self.policy.denied_calls.contains(id) || ATTRIBUTE_BUILTINS.contains(&id) {
            return Err(DenyReason::Reflection(id.to_owned()));
        }
        if is_dunder(id) && !ALLOWED_DUNDERS.contains(&id) {
            return Err(DenyReason::Reflection(id.to_owned()));
        }
        Ok(())
    }

    fn call(&self, name: &str, args: &[ast::Expr], keywords: &[ast::Keyword]) -> Check {
        if self.policy.denied_calls.contains(name) {
            return Err(DenyReason::DynamicCode(name.to_owned()));
        }
        if is_dunder(name) && !ALLOWED_DUNDERS.contains(&name) {
            return Err(DenyReason::Reflection(name.to_owned()));
        }
        if ATTRIBUTE_BUILTINS.contains(&name) {
            if let Some(ast::Expr::Name(ast::ExprName { id, .. })) = args.first()
                && (id.as_str() == "__builtins__" || self.policy.denied_modules.contains_key(id.as_str()))
            {
                return Err(DenyReason::Reflection(id.as_str().to_owned()));
            }
            // Only a literal attribute name can be vetted.
            if args.iter().any(|arg| matches!(arg, ast::Expr::Starred(_))) || !keywords.is_empty() {
                return Err(DenyReason::Reflection(name.to_owned()));
            }
            if let Some(attr) = args.get(1) {
                match string_literal(attr) {
                    Some(attr) if self.policy.is_denied_name(attr) => {
                        return Err(DenyReason::Reflection(attr.to_owned()));
                    }
                    Some(_) => {}
                    None => return Err(DenyReason::Reflection(name.to_owned())),
                }
            }
        }
        if name == "open" {
            return check_open(args, keywords);
        }
        Ok(())
    }
}

fn keyword_arg<'e>(keywords: &'e [ast::Keyword], name: &str) -> Option<&'e ast::Expr> {
    keywords
        .iter()
        .find(|keyword| keyword.arg.as_ref().is_some_and(|arg| arg.as_str() == name))
        .map(|keyword| &keyword.value)
}

fn string_literal(expr: &ast::Expr) -> Option<&str> {
    match expr {
        ast::Expr::Constant(ast::ExprConstant {
            value: ast::Constant::Str(value),
            ..
        }) => Some(value.as_str()),
        _ => None,
    }
}

fn check_open(args: &[ast::Expr], keywords: &[ast::Keyword]) -> Check {
    let mode = args.get(1).or_else(|| keyword_arg(keywords, "mode"));
    let writes = match mode {
        None => false,
        Some(mode) => match string_literal(mode) {
            Some(mode) => mode.contains(['w', 'a', 'x', '+']),
            None => true,
        },
    };
    if !writes {
        return Ok(());
    }
    let path = args.first().or_else(|| keyword_arg(keywords, "file"));
    match path.and_then(string_literal) {
        Some(path) if is_scratch_relative(path) => Ok(()),
        Some(path) => Err(DenyReason::FilesystemWrite(format!("`{path}`"))),
        None => Err(DenyReason::FilesystemWrite("a computed path".to_owned())),
    }
}

fn is_scratch_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.starts_with('\\')
        && !path.starts_with('~')
        && !path.contains(':')
        && !path.split(['/', '\\']).any(|part| part == "..")
}

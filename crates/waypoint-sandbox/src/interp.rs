//! Tree-walking evaluator.
//!
//! Single-threaded per invocation. The only suspension points are the
//! `q.*` data fetches; the wall-clock deadline and allocation watermark are
//! checked at safepoints (every statement, loop iteration, and capability
//! return). Since the language has no user functions and no `while`, every
//! script terminates structurally and the deadline is a backstop against
//! pathological-but-finite work.

use std::collections::HashMap;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::warn;

use crate::ast::{BinaryOp, Expr, Script, Stmt, UnaryOp};
use crate::caps::{
    records_to_value, DailyFilter, DataApi, ObjectiveFilter, TaskQueryFilter,
};
use crate::limits::Limits;
use crate::outcome::{ProgressReport, SandboxFailure};
use crate::render::{PlotKind, RenderOp, TableSpec};
use crate::value::Value;

/// Result of executing a statement list.
enum Control {
    /// Fell through; carries the value of the last expression statement
    Normal(Option<Value>),
    /// An explicit `return`
    Return(Value),
}

pub(crate) struct Interp<'a> {
    data: &'a dyn DataApi,
    params: Value,
    limits: &'a Limits,
    deadline: Instant,
    allocated: usize,
    pub(crate) renders: Vec<RenderOp>,
    pub(crate) progress: Option<ProgressReport>,
    scopes: Vec<HashMap<String, Value>>,
}

impl<'a> Interp<'a> {
    pub(crate) fn new(
        data: &'a dyn DataApi,
        params: serde_json::Value,
        limits: &'a Limits,
        deadline: Instant,
    ) -> Self {
        Self {
            data,
            params: Value::from_json(params),
            limits,
            deadline,
            allocated: 0,
            renders: Vec::new(),
            progress: None,
            scopes: vec![HashMap::new()],
        }
    }

    /// Execute a parsed script; returns its final value.
    pub(crate) async fn run(&mut self, script: &Script) -> Result<Value, SandboxFailure> {
        match self.exec_stmts(&script.body).await? {
            Control::Return(value) | Control::Normal(Some(value)) => Ok(value),
            Control::Normal(None) => Ok(Value::Null),
        }
    }

    // ------------------------------------------------------------------
    // Safepoints and accounting
    // ------------------------------------------------------------------

    fn checkpoint(&self) -> Result<(), SandboxFailure> {
        if Instant::now() >= self.deadline {
            return Err(SandboxFailure::Timeout);
        }
        if self.allocated > self.limits.max_memory_bytes {
            return Err(SandboxFailure::OutOfMemory);
        }
        Ok(())
    }

    fn charge(&mut self, bytes: usize) -> Result<(), SandboxFailure> {
        self.allocated = self.allocated.saturating_add(bytes);
        if self.allocated > self.limits.max_memory_bytes {
            return Err(SandboxFailure::OutOfMemory);
        }
        Ok(())
    }

    fn runtime_error(message: impl Into<String>) -> SandboxFailure {
        SandboxFailure::Runtime(message.into())
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    fn declare(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<(), SandboxFailure> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return Ok(());
            }
        }
        Err(Self::runtime_error(format!(
            "assignment to undeclared variable {name}"
        )))
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn exec_stmts<'s>(
        &'s mut self,
        stmts: &'s [Stmt],
    ) -> BoxFuture<'s, Result<Control, SandboxFailure>> {
        async move {
            let mut last = None;
            for stmt in stmts {
                self.checkpoint()?;
                match stmt {
                    Stmt::Let { name, value, .. } => {
                        let value = self.eval(value).await?;
                        self.declare(name, value);
                        last = None;
                    }
                    Stmt::Assign { name, value, .. } => {
                        let value = self.eval(value).await?;
                        self.assign(name, value)?;
                        last = None;
                    }
                    Stmt::If {
                        condition,
                        then_branch,
                        else_branch,
                        line,
                    } => {
                        let condition_value = self.eval(condition).await?;
                        let truthy = condition_value.as_condition().ok_or_else(|| {
                            Self::runtime_error(format!(
                                "if condition must be a boolean, got {} (line {line})",
                                condition_value.kind()
                            ))
                        })?;
                        let branch = if truthy {
                            Some(then_branch)
                        } else {
                            else_branch.as_ref()
                        };
                        if let Some(branch) = branch {
                            self.scopes.push(HashMap::new());
                            let control = self.exec_stmts(branch).await;
                            self.scopes.pop();
                            match control? {
                                Control::Return(value) => return Ok(Control::Return(value)),
                                Control::Normal(_) => {}
                            }
                        }
                        last = None;
                    }
                    Stmt::ForOf {
                        binding,
                        iterable,
                        body,
                        line,
                    } => {
                        let iterable_value = self.eval(iterable).await?;
                        let Value::List(items) = iterable_value else {
                            return Err(Self::runtime_error(format!(
                                "for loop needs a list, got {} (line {line})",
                                iterable_value.kind()
                            )));
                        };
                        for item in items {
                            self.checkpoint()?;
                            self.scopes.push(HashMap::new());
                            self.declare(binding, item);
                            let control = self.exec_stmts(body).await;
                            self.scopes.pop();
                            match control? {
                                Control::Return(value) => return Ok(Control::Return(value)),
                                Control::Normal(_) => {}
                            }
                        }
                        last = None;
                    }
                    Stmt::Return { value, .. } => {
                        let value = match value {
                            Some(expr) => self.eval(expr).await?,
                            None => Value::Null,
                        };
                        return Ok(Control::Return(value));
                    }
                    Stmt::Expr { expr, .. } => {
                        last = Some(self.eval(expr).await?);
                    }
                }
            }
            Ok(Control::Normal(last))
        }
        .boxed()
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn eval<'s>(&'s mut self, expr: &'s Expr) -> BoxFuture<'s, Result<Value, SandboxFailure>> {
        async move {
            match expr {
                Expr::Number(n) => Ok(Value::Number(*n)),
                Expr::Str(s) => Ok(Value::Str(s.clone())),
                Expr::Bool(b) => Ok(Value::Bool(*b)),
                Expr::Null => Ok(Value::Null),
                Expr::Await(inner) => self.eval(inner).await,
                Expr::Ident(name) => match name.as_str() {
                    "params" => Ok(self.params.clone()),
                    "q" | "render" | "progress" => Err(Self::runtime_error(format!(
                        "{name} is a host object and cannot be used as a value"
                    ))),
                    _ => self
                        .lookup(name)
                        .cloned()
                        .ok_or_else(|| Self::runtime_error(format!("unknown variable {name}"))),
                },
                Expr::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item).await?);
                    }
                    let value = Value::List(values);
                    self.charge(value.approx_size())?;
                    Ok(value)
                }
                Expr::Map(entries) => {
                    let mut map = std::collections::BTreeMap::new();
                    for (key, value_expr) in entries {
                        let value = self.eval(value_expr).await?;
                        map.insert(key.clone(), value);
                    }
                    let value = Value::Map(map);
                    self.charge(value.approx_size())?;
                    Ok(value)
                }
                Expr::Member { object, property } => {
                    if let Expr::Ident(root) = object.as_ref() {
                        if matches!(root.as_str(), "q" | "render" | "progress") {
                            return Err(Self::runtime_error(format!(
                                "{root}.{property} must be called"
                            )));
                        }
                    }
                    let object = self.eval(object).await?;
                    Ok(member_of(&object, property))
                }
                Expr::Index { object, index } => {
                    let object = self.eval(object).await?;
                    let index = self.eval(index).await?;
                    index_of(&object, &index)
                }
                Expr::Unary(op, inner) => {
                    let value = self.eval(inner).await?;
                    match op {
                        UnaryOp::Neg => value
                            .as_number()
                            .map(|n| Value::Number(-n))
                            .ok_or_else(|| {
                                Self::runtime_error(format!("cannot negate {}", value.kind()))
                            }),
                        UnaryOp::Not => match value {
                            Value::Bool(b) => Ok(Value::Bool(!b)),
                            Value::Null => Ok(Value::Bool(true)),
                            other => Err(Self::runtime_error(format!(
                                "cannot apply ! to {}",
                                other.kind()
                            ))),
                        },
                    }
                }
                Expr::Binary(op, lhs, rhs) => self.eval_binary(*op, lhs, rhs).await,
                Expr::Ternary {
                    condition,
                    then,
                    otherwise,
                } => {
                    let condition_value = self.eval(condition).await?;
                    let truthy = condition_value.as_condition().ok_or_else(|| {
                        Self::runtime_error(format!(
                            "ternary condition must be a boolean, got {}",
                            condition_value.kind()
                        ))
                    })?;
                    if truthy {
                        self.eval(then).await
                    } else {
                        self.eval(otherwise).await
                    }
                }
                Expr::Call { callee, args } => self.eval_call(callee, args).await,
            }
        }
        .boxed()
    }

    async fn eval_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Value, SandboxFailure> {
        // Short-circuit logic first.
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let left = self.eval(lhs).await?;
                let left_truthy = left.as_condition().ok_or_else(|| {
                    Self::runtime_error(format!("cannot apply logic to {}", left.kind()))
                })?;
                return match (op, left_truthy) {
                    (BinaryOp::And, false) => Ok(Value::Bool(false)),
                    (BinaryOp::Or, true) => Ok(Value::Bool(true)),
                    _ => {
                        let right = self.eval(rhs).await?;
                        let right_truthy = right.as_condition().ok_or_else(|| {
                            Self::runtime_error(format!(
                                "cannot apply logic to {}",
                                right.kind()
                            ))
                        })?;
                        Ok(Value::Bool(right_truthy))
                    }
                };
            }
            _ => {}
        }

        let left = self.eval(lhs).await?;
        let right = self.eval(rhs).await?;

        match op {
            BinaryOp::Eq => Ok(Value::Bool(left == right)),
            BinaryOp::Ne => Ok(Value::Bool(left != right)),
            BinaryOp::Add => match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                // String concatenation accepts any right/left operand, the
                // way widget label code expects.
                (Value::Str(_), _) | (_, Value::Str(_)) => {
                    let joined = format!("{}{}", left.display_string(), right.display_string());
                    self.charge(joined.len())?;
                    Ok(Value::Str(joined))
                }
                _ => Err(Self::runtime_error(format!(
                    "cannot add {} and {}",
                    left.kind(),
                    right.kind()
                ))),
            },
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
                    return Err(Self::runtime_error(format!(
                        "arithmetic needs numbers, got {} and {}",
                        left.kind(),
                        right.kind()
                    )));
                };
                match op {
                    BinaryOp::Sub => Ok(Value::Number(a - b)),
                    BinaryOp::Mul => Ok(Value::Number(a * b)),
                    BinaryOp::Div => {
                        if b == 0.0 {
                            Err(Self::runtime_error("division by zero"))
                        } else {
                            Ok(Value::Number(a / b))
                        }
                    }
                    BinaryOp::Rem => {
                        if b == 0.0 {
                            Err(Self::runtime_error("division by zero"))
                        } else {
                            Ok(Value::Number(a % b))
                        }
                    }
                    _ => unreachable!(),
                }
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = match (&left, &right) {
                    (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                    // Lexicographic compare works for ISO dates.
                    (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                    _ => None,
                };
                let Some(ordering) = ordering else {
                    return Err(Self::runtime_error(format!(
                        "cannot compare {} and {}",
                        left.kind(),
                        right.kind()
                    )));
                };
                let result = match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    BinaryOp::Ge => ordering.is_ge(),
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        }
    }

    // ------------------------------------------------------------------
    // Calls: host dispatch and globals
    // ------------------------------------------------------------------

    async fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Value, SandboxFailure> {
        // Host object dispatch is structural: the callee must name the
        // global directly, so aliasing a capability is impossible.
        match callee {
            Expr::Member { object, property } => match object.as_ref() {
                Expr::Ident(root) if root == "q" => {
                    let args = self.eval_args(args).await?;
                    return self.call_q(property, &args).await;
                }
                Expr::Ident(root) if root == "render" => {
                    let args = self.eval_args(args).await?;
                    return self.call_render(property, &args);
                }
                Expr::Ident(root) if root == "progress" => {
                    if property != "set" {
                        return Err(Self::runtime_error(format!(
                            "progress has no operation {property}"
                        )));
                    }
                    let args = self.eval_args(args).await?;
                    return self.call_progress_set(&args);
                }
                Expr::Member {
                    object: inner,
                    property: mid,
                } if matches!(inner.as_ref(), Expr::Ident(root) if root == "render")
                    && mid == "plot" =>
                {
                    let args = self.eval_args(args).await?;
                    return self.call_render_plot(property, &args);
                }
                _ => {}
            },
            Expr::Ident(name) => {
                let args = self.eval_args(args).await?;
                return self.call_global(name, &args);
            }
            _ => {}
        }
        Err(Self::runtime_error("only capability operations are callable"))
    }

    async fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, SandboxFailure> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg).await?);
        }
        Ok(values)
    }

    fn call_global(&mut self, name: &str, args: &[Value]) -> Result<Value, SandboxFailure> {
        match name {
            "len" => {
                let [value] = args else {
                    return Err(Self::runtime_error("len takes exactly 1 argument"));
                };
                match value {
                    Value::List(items) => Ok(Value::Number(items.len() as f64)),
                    Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
                    Value::Map(entries) => Ok(Value::Number(entries.len() as f64)),
                    other => Err(Self::runtime_error(format!(
                        "len expects a list, string, or map, got {}",
                        other.kind()
                    ))),
                }
            }
            "str" => {
                let [value] = args else {
                    return Err(Self::runtime_error("str takes exactly 1 argument"));
                };
                Ok(Value::Str(value.display_string()))
            }
            "num" => {
                let [value] = args else {
                    return Err(Self::runtime_error("num takes exactly 1 argument"));
                };
                match value {
                    Value::Number(n) => Ok(Value::Number(*n)),
                    Value::Str(s) => s.trim().parse::<f64>().map_or(Ok(Value::Null), |n| {
                        Ok(Value::Number(n))
                    }),
                    Value::Bool(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
                    _ => Ok(Value::Null),
                }
            }
            other => Err(Self::runtime_error(format!("unknown function {other}"))),
        }
    }

    async fn call_q(&mut self, name: &str, args: &[Value]) -> Result<Value, SandboxFailure> {
        match name {
            "daily" => {
                let filter = DailyFilter::from_arg(args.first()).map_err(Self::runtime_error)?;
                let records = self.data.daily(&filter).await.map_err(|e| {
                    warn!(error = %e, "q.daily fetch failed");
                    Self::runtime_error("q.daily failed")
                })?;
                self.fetch_result(records_to_value(&records), records.len())
            }
            "tasks" => {
                let filter =
                    TaskQueryFilter::from_arg(args.first()).map_err(Self::runtime_error)?;
                let records = self.data.tasks(&filter).await.map_err(|e| {
                    warn!(error = %e, "q.tasks fetch failed");
                    Self::runtime_error("q.tasks failed")
                })?;
                self.fetch_result(records_to_value(&records), records.len())
            }
            "objectives" => {
                let filter =
                    ObjectiveFilter::from_arg(args.first()).map_err(Self::runtime_error)?;
                let records = self.data.objectives(&filter).await.map_err(|e| {
                    warn!(error = %e, "q.objectives fetch failed");
                    Self::runtime_error("q.objectives failed")
                })?;
                self.fetch_result(records_to_value(&records), records.len())
            }
            "today" => {
                let today = self.data.today();
                let json = serde_json::to_value(&today)
                    .map_err(|_| Self::runtime_error("q.today failed"))?;
                Ok(Value::from_json(json))
            }
            "sum" | "avg" => self.aggregate(name, args),
            "count" => {
                let [Value::List(items)] = args else {
                    return Err(Self::runtime_error("q.count takes a list"));
                };
                Ok(Value::Number(items.len() as f64))
            }
            "parseTime" => {
                let [Value::Str(s)] = args else {
                    return Err(Self::runtime_error("q.parseTime takes a time string"));
                };
                Ok(waypoint_core::parse_time(s)
                    .map_or(Value::Null, |minutes| Value::Number(minutes as f64)))
            }
            "formatDuration" => {
                let [value] = args else {
                    return Err(Self::runtime_error("q.formatDuration takes a number"));
                };
                let minutes = value.as_number().ok_or_else(|| {
                    Self::runtime_error("q.formatDuration takes a number of minutes")
                })?;
                Ok(Value::Str(waypoint_core::format_duration(minutes as i64)))
            }
            "formatPercent" => {
                let (Some(a), Some(b)) = (
                    args.first().and_then(Value::as_number),
                    args.get(1).and_then(Value::as_number),
                ) else {
                    return Err(Self::runtime_error("q.formatPercent takes two numbers"));
                };
                Ok(Value::Str(waypoint_core::format_percent(a, b)))
            }
            other => Err(Self::runtime_error(format!("q has no operation {other}"))),
        }
    }

    fn fetch_result(&mut self, value: Value, rows: usize) -> Result<Value, SandboxFailure> {
        if rows > self.limits.max_fetch_rows {
            return Err(Self::runtime_error(format!(
                "fetch returned {rows} rows, more than the {} row cap",
                self.limits.max_fetch_rows
            )));
        }
        self.charge(value.approx_size())?;
        self.checkpoint()?;
        Ok(value)
    }

    fn aggregate(&self, name: &str, args: &[Value]) -> Result<Value, SandboxFailure> {
        let Some(Value::List(items)) = args.first() else {
            return Err(Self::runtime_error(format!("q.{name} takes a list")));
        };
        let field = match args.get(1) {
            None | Some(Value::Null) => None,
            Some(Value::Str(field)) => Some(field.as_str()),
            Some(other) => {
                return Err(Self::runtime_error(format!(
                    "q.{name} field must be a string, got {}",
                    other.kind()
                )))
            }
        };

        let mut total = 0.0;
        let mut counted = 0usize;
        for item in items {
            let candidate = match field {
                Some(field) => member_of(item, field),
                None => item.clone(),
            };
            if let Some(n) = candidate.as_number() {
                total += n;
                counted += 1;
            }
        }

        match name {
            "sum" => Ok(Value::Number(total)),
            "avg" => {
                if counted == 0 {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Number(total / counted as f64))
                }
            }
            _ => unreachable!(),
        }
    }

    fn call_render(&mut self, name: &str, args: &[Value]) -> Result<Value, SandboxFailure> {
        let op = match name {
            "markdown" => {
                let [value] = args else {
                    return Err(Self::runtime_error("render.markdown takes 1 argument"));
                };
                RenderOp::Markdown {
                    content: value.display_string(),
                }
            }
            "table" => {
                let [Value::Map(spec)] = args else {
                    return Err(Self::runtime_error(
                        "render.table takes a {headers, rows} map",
                    ));
                };
                let headers = match spec.get("headers") {
                    Some(Value::List(items)) => items
                        .iter()
                        .map(Value::display_string)
                        .collect::<Vec<String>>(),
                    _ => return Err(Self::runtime_error("render.table needs a headers list")),
                };
                let rows = match spec.get("rows") {
                    Some(Value::List(rows)) => {
                        let mut converted = Vec::with_capacity(rows.len());
                        for row in rows {
                            let Value::List(cells) = row else {
                                return Err(Self::runtime_error(
                                    "render.table rows must be lists",
                                ));
                            };
                            converted.push(cells.iter().map(Value::to_json).collect());
                        }
                        converted
                    }
                    _ => return Err(Self::runtime_error("render.table needs a rows list")),
                };
                RenderOp::Table {
                    table: TableSpec { headers, rows },
                }
            }
            "json" => {
                let [value] = args else {
                    return Err(Self::runtime_error("render.json takes 1 argument"));
                };
                RenderOp::Json {
                    value: value.to_json(),
                }
            }
            other => {
                return Err(Self::runtime_error(format!(
                    "render has no operation {other}"
                )))
            }
        };
        self.push_render(op)
    }

    fn call_render_plot(&mut self, kind: &str, args: &[Value]) -> Result<Value, SandboxFailure> {
        let kind = match kind {
            "bar" => PlotKind::Bar,
            "line" => PlotKind::Line,
            "pie" => PlotKind::Pie,
            "multi" => PlotKind::Multi,
            other => {
                return Err(Self::runtime_error(format!(
                    "render.plot has no kind {other}"
                )))
            }
        };
        let [spec] = args else {
            return Err(Self::runtime_error("render.plot takes a spec map"));
        };
        if !matches!(spec, Value::Map(_)) {
            return Err(Self::runtime_error(format!(
                "render.plot spec must be a map, got {}",
                spec.kind()
            )));
        }
        self.push_render(RenderOp::Plot {
            kind,
            spec: spec.to_json(),
        })
    }

    fn push_render(&mut self, op: RenderOp) -> Result<Value, SandboxFailure> {
        if self.renders.len() >= self.limits.max_render_ops {
            return Err(SandboxFailure::OutputTooLarge);
        }
        self.renders.push(op);
        Ok(Value::Null)
    }

    fn call_progress_set(&mut self, args: &[Value]) -> Result<Value, SandboxFailure> {
        let (Some(numerator), Some(denominator)) = (
            args.first().and_then(Value::as_number),
            args.get(1).and_then(Value::as_number),
        ) else {
            return Err(Self::runtime_error("progress.set takes two numbers"));
        };
        // Non-positive denominator is a specified no-op; last valid call wins.
        if let Some(report) = ProgressReport::new(numerator, denominator) {
            self.progress = Some(report);
        }
        Ok(Value::Null)
    }
}

// ----------------------------------------------------------------------
// Property and index access
// ----------------------------------------------------------------------

fn member_of(object: &Value, property: &str) -> Value {
    match object {
        Value::Map(entries) => entries.get(property).cloned().unwrap_or(Value::Null),
        Value::List(items) if property == "length" => Value::Number(items.len() as f64),
        Value::Str(s) if property == "length" => Value::Number(s.chars().count() as f64),
        _ => Value::Null,
    }
}

fn index_of(object: &Value, index: &Value) -> Result<Value, SandboxFailure> {
    match (object, index) {
        (Value::List(items), Value::Number(n)) => {
            if n.fract() != 0.0 || *n < 0.0 {
                return Ok(Value::Null);
            }
            Ok(items.get(*n as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::Map(entries), Value::Str(key)) => {
            Ok(entries.get(key).cloned().unwrap_or(Value::Null))
        }
        (object, index) => Err(SandboxFailure::Runtime(format!(
            "cannot index {} with {}",
            object.kind(),
            index.kind()
        ))),
    }
}

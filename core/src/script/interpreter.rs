//! Tree-walking evaluator.
//!
//! Every statement, expression and loop iteration is charged to a [`Meter`];
//! the meter also watches the wall-clock deadline and the cancellation token,
//! so a runaway script stops at the next step boundary.

use super::ast::*;
use super::value::{assign, lookup, Closure, Env, Object, Scope, Value};
use super::{BudgetKind, ScriptError, ScriptResult};
use crate::geometry::{Outline, Solid};
use crate::kernel::GeometryKernel;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Steps between deadline and cancellation checks.
const CHECK_INTERVAL: u64 = 1024;

/// Hard bounds on one script run.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_steps: u64,
    pub deadline: Option<Instant>,
    pub max_call_depth: usize,
    /// Total polygons produced by geometry calls over the whole run.
    pub max_polygons: usize,
    pub max_string_len: usize,
    pub max_array_len: usize,
    /// Bytes of array slots and string data allocated over the whole run.
    /// Never refunded, so live memory stays below it too.
    pub max_alloc_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 10_000_000,
            deadline: None,
            max_call_depth: 128,
            max_polygons: 2_000_000,
            max_string_len: 1 << 20,
            max_array_len: 1 << 20,
            max_alloc_bytes: 256 << 20,
        }
    }
}

pub struct Meter {
    limits: Limits,
    steps: u64,
    polygons: usize,
    allocated: Cell<usize>,
    call_depth: usize,
    cancel: CancellationToken,
}

impl Meter {
    pub fn new(limits: Limits, cancel: CancellationToken) -> Self {
        Self {
            limits,
            steps: 0,
            polygons: 0,
            allocated: Cell::new(0),
            call_depth: 0,
            cancel,
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn polygons(&self) -> usize {
        self.polygons
    }

    pub fn tick(&mut self) -> ScriptResult<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(ScriptError::BudgetExhausted(BudgetKind::Steps));
        }
        if self.steps % CHECK_INTERVAL == 0 {
            self.check_interrupts()?;
        }
        Ok(())
    }

    pub fn check_interrupts(&self) -> ScriptResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ScriptError::Cancelled);
        }
        if let Some(deadline) = self.limits.deadline {
            if Instant::now() >= deadline {
                return Err(ScriptError::BudgetExhausted(BudgetKind::Deadline));
            }
        }
        Ok(())
    }

    pub fn charge_polygons(&mut self, count: usize) -> ScriptResult<()> {
        self.polygons = self.polygons.saturating_add(count);
        if self.polygons > self.limits.max_polygons {
            return Err(ScriptError::BudgetExhausted(BudgetKind::Polygons));
        }
        Ok(())
    }

    pub fn allocated(&self) -> usize {
        self.allocated.get()
    }

    /// Charges an allocation before it is made.
    pub fn charge_alloc(&self, bytes: usize) -> ScriptResult<()> {
        let total = self.allocated.get().saturating_add(bytes);
        self.allocated.set(total);
        if total > self.limits.max_alloc_bytes {
            return Err(ScriptError::BudgetExhausted(BudgetKind::Memory));
        }
        Ok(())
    }

    fn enter_call(&mut self) -> ScriptResult<()> {
        if self.call_depth >= self.limits.max_call_depth {
            return Err(ScriptError::Range("Maximum call stack size exceeded".into()));
        }
        self.call_depth += 1;
        Ok(())
    }

    fn exit_call(&mut self) {
        self.call_depth = self.call_depth.saturating_sub(1);
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Assignable location, resolved once so side effects in the target run once.
enum Place {
    Var(Rc<str>),
    Property(Value, Value),
}

pub struct Interpreter {
    kernel: Arc<dyn GeometryKernel>,
    meter: Meter,
    root: Env,
    captured: Vec<Weak<RefCell<Scope>>>,
    line: u32,
}

impl Interpreter {
    /// `root` is the outermost scope; names not bound there do not exist.
    pub fn new(kernel: Arc<dyn GeometryKernel>, root: Env, meter: Meter) -> Self {
        Self {
            kernel,
            meter,
            root,
            captured: Vec::new(),
            line: 0,
        }
    }

    pub fn kernel(&self) -> Arc<dyn GeometryKernel> {
        self.kernel.clone()
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// Line of the statement that ran last.
    pub fn current_line(&self) -> u32 {
        self.line
    }

    pub fn check_interrupts(&self) -> ScriptResult<()> {
        self.meter.check_interrupts()
    }

    /// Wraps a kernel result, charging its polygons to the budget.
    pub fn solid_value(&mut self, solid: Solid) -> ScriptResult<Value> {
        self.meter.charge_polygons(solid.polygon_count())?;
        Ok(Value::solid(solid))
    }

    pub fn shape_value(&mut self, outline: Outline) -> ScriptResult<Value> {
        self.meter.charge_polygons(1)?;
        Ok(Value::Shape(Rc::new(outline)))
    }

    pub fn make_array(&self, items: Vec<Value>) -> ScriptResult<Value> {
        self.check_array_len(items.len())?;
        self.charge_cells(items.len())?;
        Ok(Value::array(items))
    }

    /// Charges `count` array slots to the allocation budget.
    pub fn charge_cells(&self, count: usize) -> ScriptResult<()> {
        self.meter
            .charge_alloc(count.saturating_mul(std::mem::size_of::<Value>()))
    }

    /// Checks the final length and charges the slots a copy or growth adds.
    fn reserve_cells(&self, new_len: usize, added: usize) -> ScriptResult<()> {
        self.check_array_len(new_len)?;
        self.charge_cells(added)
    }

    fn check_array_len(&self, len: usize) -> ScriptResult<()> {
        if len > self.meter.limits.max_array_len {
            return Err(ScriptError::Range(format!(
                "array length {} exceeds the limit of {}",
                len, self.meter.limits.max_array_len
            )));
        }
        Ok(())
    }

    fn make_string(&self, s: String) -> ScriptResult<Value> {
        if s.len() > self.meter.limits.max_string_len {
            return Err(ScriptError::Range(format!(
                "string length exceeds the limit of {}",
                self.meter.limits.max_string_len
            )));
        }
        self.meter.charge_alloc(s.len())?;
        Ok(Value::Str(Rc::from(s)))
    }

    /// Runs the top-level statements in a fresh scope under the root and
    /// returns that scope.
    pub fn run(&mut self, program: &Program) -> ScriptResult<Env> {
        let global = Scope::child(&self.root);
        self.register_scope(&global);
        match self.exec_block_in(&program.body, &global)? {
            Flow::Normal | Flow::Return(_) => Ok(global),
            Flow::Break | Flow::Continue => Err(self.illegal_jump()),
        }
    }

    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> ScriptResult<Value> {
        match callee {
            Value::Native(native) => (native.func)(self, args),
            Value::Function(closure) => {
                self.meter.enter_call()?;
                let saved_line = self.line;
                let result = self.invoke(closure, args);
                self.meter.exit_call();
                if result.is_ok() {
                    self.line = saved_line;
                }
                result
            }
            other => Err(ScriptError::type_error(format!(
                "{} is not a function",
                other.type_name()
            ))),
        }
    }

    fn illegal_jump(&self) -> ScriptError {
        ScriptError::Syntax {
            message: "break or continue outside of a loop".into(),
            line: self.line,
            column: 1,
        }
    }

    fn register_scope(&mut self, env: &Env) {
        if let Some(last) = self.captured.last() {
            if Weak::ptr_eq(last, &Rc::downgrade(env)) {
                return;
            }
        }
        self.captured.push(Rc::downgrade(env));
    }

    fn make_closure(&mut self, def: &Rc<FunctionDef>, env: &Env) -> Value {
        self.register_scope(env);
        Value::Function(Rc::new(Closure {
            def: def.clone(),
            env: env.clone(),
        }))
    }

    fn invoke(&mut self, closure: &Closure, args: Vec<Value>) -> ScriptResult<Value> {
        let scope = Scope::child(&closure.env);
        let def = &closure.def;
        let mut args = args.into_iter();
        for param in &def.params {
            let mut value = args.next().unwrap_or_default();
            if matches!(value, Value::Undefined) {
                if let Some(default) = &param.default {
                    value = self.eval(default, &scope)?;
                }
            }
            self.bind_pattern(&param.pattern, value, &scope, DeclKind::Var)?;
        }
        if let Some(rest) = &def.rest {
            let remaining = self.make_array(args.collect())?;
            self.bind_pattern(rest, remaining, &scope, DeclKind::Var)?;
        }

        match &def.body {
            FunctionBody::Expr(expr) => self.eval(expr, &scope),
            FunctionBody::Block(body) => match self.exec_block_in(body, &scope)? {
                Flow::Return(value) => Ok(value),
                Flow::Normal => Ok(Value::Undefined),
                Flow::Break | Flow::Continue => Err(self.illegal_jump()),
            },
        }
    }

    // === Statements ===

    fn exec_block_in(&mut self, body: &[Stmt], env: &Env) -> ScriptResult<Flow> {
        for stmt in body {
            if let StmtKind::Function(def) = &stmt.kind {
                if let Some(name) = &def.name {
                    let closure = self.make_closure(def, env);
                    env.borrow_mut().declare(name.clone(), closure, true);
                }
            }
        }
        for stmt in body {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &Env) -> ScriptResult<Flow> {
        self.line = stmt.line;
        self.meter.tick()?;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, env)?;
                Ok(Flow::Normal)
            }
            StmtKind::Decl(kind, declarators) => {
                for declarator in declarators {
                    let value = match &declarator.init {
                        Some(init) => self.eval(init, env)?,
                        None => Value::Undefined,
                    };
                    self.bind_pattern(&declarator.pattern, value, env, *kind)?;
                }
                Ok(Flow::Normal)
            }
            StmtKind::Function(_) | StmtKind::Empty => Ok(Flow::Normal),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, env)?.is_truthy() {
                    self.exec_scoped(consequent, env)
                } else if let Some(alternate) = alternate {
                    self.exec_scoped(alternate, env)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::Block(body) => {
                let scope = Scope::child(env);
                self.exec_block_in(body, &scope)
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                let scope = Scope::child(env);
                match init {
                    Some(ForInit::Decl(kind, declarators)) => {
                        for declarator in declarators {
                            let value = match &declarator.init {
                                Some(init) => self.eval(init, &scope)?,
                                None => Value::Undefined,
                            };
                            self.bind_pattern(&declarator.pattern, value, &scope, *kind)?;
                        }
                    }
                    Some(ForInit::Expr(expr)) => {
                        self.eval(expr, &scope)?;
                    }
                    None => {}
                }
                loop {
                    self.meter.tick()?;
                    if let Some(test) = test {
                        if !self.eval(test, &scope)?.is_truthy() {
                            break;
                        }
                    }
                    match self.exec_scoped(body, &scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Continue | Flow::Normal => {}
                    }
                    if let Some(update) = update {
                        self.eval(update, &scope)?;
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::ForOf {
                kind,
                pattern,
                iterable,
                body,
            } => {
                let iterable = self.eval(iterable, env)?;
                let items = self.iterable_items(&iterable, "for...of")?;
                for item in items {
                    self.meter.tick()?;
                    let scope = Scope::child(env);
                    self.bind_pattern(pattern, item, &scope, *kind)?;
                    match self.exec_scoped(body, &scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::While { test, body } => {
                loop {
                    self.meter.tick()?;
                    if !self.eval(test, env)?.is_truthy() {
                        break;
                    }
                    match self.exec_scoped(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Throw(expr) => {
                let value = self.eval(expr, env)?;
                Err(ScriptError::Thrown(thrown_message(&value)))
            }
        }
    }

    /// Runs a nested statement; a bare declaration still gets its own scope.
    fn exec_scoped(&mut self, stmt: &Stmt, env: &Env) -> ScriptResult<Flow> {
        match stmt.kind {
            StmtKind::Decl(..) | StmtKind::Function(_) => {
                let scope = Scope::child(env);
                self.exec_block_in(std::slice::from_ref(stmt), &scope)
            }
            _ => self.exec(stmt, env),
        }
    }

    fn declare(&mut self, env: &Env, name: &Rc<str>, value: Value, kind: DeclKind) -> ScriptResult<()> {
        let mut scope = env.borrow_mut();
        if kind != DeclKind::Var && scope.has_own(name) {
            return Err(ScriptError::Syntax {
                message: format!("Identifier '{}' has already been declared", name),
                line: self.line,
                column: 1,
            });
        }
        scope.declare(name.clone(), value, kind != DeclKind::Const);
        Ok(())
    }

    fn bind_pattern(&mut self, pattern: &Pattern, value: Value, env: &Env, kind: DeclKind) -> ScriptResult<()> {
        match pattern {
            Pattern::Ident(name) => self.declare(env, name, value, kind),
            Pattern::Object { properties, rest } => {
                if value.is_nullish() {
                    return Err(ScriptError::type_error(format!(
                        "Cannot destructure '{}' as it is {}.",
                        value.to_display_string(),
                        value.type_name()
                    )));
                }
                for property in properties {
                    let mut item = self.get_property(&value, &property.key)?;
                    if matches!(item, Value::Undefined) {
                        if let Some(default) = &property.default {
                            item = self.eval(default, env)?;
                        }
                    }
                    self.bind_pattern(&property.value, item, env, kind)?;
                }
                if let Some(rest) = rest {
                    let mut remaining = Object::new();
                    if let Value::Object(map) = &value {
                        for (key, item) in map.borrow().iter() {
                            if !properties.iter().any(|p| p.key == *key) {
                                remaining.insert(key.clone(), item.clone());
                            }
                        }
                    }
                    self.declare(env, rest, Value::object(remaining), kind)?;
                }
                Ok(())
            }
            Pattern::Array { elements, rest } => {
                let items = self.iterable_items(&value, "destructuring")?;
                for (i, element) in elements.iter().enumerate() {
                    let Some(element) = element else {
                        continue;
                    };
                    let mut item = items.get(i).cloned().unwrap_or_default();
                    if matches!(item, Value::Undefined) {
                        if let Some(default) = &element.default {
                            item = self.eval(default, env)?;
                        }
                    }
                    self.bind_pattern(&element.pattern, item, env, kind)?;
                }
                if let Some(rest) = rest {
                    let remaining = items.iter().skip(elements.len()).cloned().collect();
                    let remaining = self.make_array(remaining)?;
                    self.bind_pattern(rest, remaining, env, kind)?;
                }
                Ok(())
            }
        }
    }

    fn iterable_items(&self, value: &Value, context: &str) -> ScriptResult<Vec<Value>> {
        match value {
            Value::Array(items) => {
                self.charge_cells(items.borrow().len())?;
                Ok(items.borrow().clone())
            }
            Value::Str(s) => {
                self.charge_cells(s.len())?;
                Ok(s.chars().map(|c| Value::str(&c.to_string())).collect())
            }
            other => Err(ScriptError::type_error(format!(
                "{} is not iterable (in {})",
                other.type_name(),
                context
            ))),
        }
    }

    // === Expressions ===

    fn eval(&mut self, expr: &Expr, env: &Env) -> ScriptResult<Value> {
        self.meter.tick()?;
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Ident(name) => lookup(env, name)
                .ok_or_else(|| ScriptError::Reference(format!("{} is not defined", name))),
            Expr::Array(elements) => {
                let items = self.eval_elements(elements, env)?;
                self.make_array(items)
            }
            Expr::Object(entries) => {
                let mut map = Object::new();
                for entry in entries {
                    match entry {
                        ObjectEntry::Property { key, value } => {
                            let key = match key {
                                PropertyKey::Named(name) => name.clone(),
                                PropertyKey::Computed(expr) => {
                                    Rc::from(self.eval(expr, env)?.to_display_string())
                                }
                            };
                            let value = self.eval(value, env)?;
                            map.insert(key, value);
                        }
                        ObjectEntry::Spread(expr) => match self.eval(expr, env)? {
                            Value::Object(source) => {
                                for (k, v) in source.borrow().iter() {
                                    map.insert(k.clone(), v.clone());
                                }
                            }
                            Value::Array(source) => {
                                for (i, v) in source.borrow().iter().enumerate() {
                                    map.insert(Rc::from(i.to_string()), v.clone());
                                }
                            }
                            _ => {}
                        },
                    }
                }
                Ok(Value::object(map))
            }
            Expr::Function(def) => Ok(self.make_closure(def, env)),
            Expr::Member { object, property } => {
                let object = self.eval(object, env)?;
                self.get_property(&object, property)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                self.get_index(&object, &index)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, env),
            Expr::Unary { op, operand } => {
                if let (UnaryOperator::TypeOf, Expr::Ident(name)) = (op, operand.as_ref()) {
                    let value = lookup(env, name).unwrap_or_default();
                    return Ok(Value::str(value.type_of()));
                }
                let value = self.eval(operand, env)?;
                Ok(match op {
                    UnaryOperator::Neg => Value::Number(-value.to_number()),
                    UnaryOperator::Plus => Value::Number(value.to_number()),
                    UnaryOperator::Not => Value::Bool(!value.is_truthy()),
                    UnaryOperator::TypeOf => Value::str(value.type_of()),
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary(*op, &left, &right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, env)?;
                let short_circuit = match op {
                    LogicalOperator::And => !left.is_truthy(),
                    LogicalOperator::Or => left.is_truthy(),
                    LogicalOperator::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, env)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, env)?.is_truthy() {
                    self.eval(consequent, env)
                } else {
                    self.eval(alternate, env)
                }
            }
            Expr::Assign { target, op, value } => {
                let place = self.resolve_place(target, env)?;
                let value = match op {
                    None => self.eval(value, env)?,
                    Some(op) => {
                        let current = self.read_place(&place, env)?;
                        let rhs = self.eval(value, env)?;
                        self.binary(*op, &current, &rhs)?
                    }
                };
                self.write_place(&place, value.clone(), env)?;
                Ok(value)
            }
            Expr::Update { op, prefix, target } => {
                let place = self.resolve_place(target, env)?;
                let old = self.read_place(&place, env)?.to_number();
                let new = match op {
                    UpdateOperator::Increment => old + 1.0,
                    UpdateOperator::Decrement => old - 1.0,
                };
                self.write_place(&place, Value::Number(new), env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
        }
    }

    fn eval_elements(&mut self, elements: &[Element], env: &Env) -> ScriptResult<Vec<Value>> {
        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                Element::Expr(expr) => values.push(self.eval(expr, env)?),
                Element::Spread(expr) => {
                    let value = self.eval(expr, env)?;
                    let items = self.iterable_items(&value, "spread")?;
                    self.check_array_len(values.len().saturating_add(items.len()))?;
                    values.extend(items);
                }
            }
        }
        Ok(values)
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Element], env: &Env) -> ScriptResult<Value> {
        if let Expr::Member { object, property } = callee {
            let receiver = self.eval(object, env)?;
            let args = self.eval_elements(args, env)?;
            if let Some(result) = self.call_builtin_method(&receiver, property, &args)? {
                return Ok(result);
            }
            let function = self.get_property(&receiver, property)?;
            if !function.is_callable() {
                return Err(not_a_function(callee));
            }
            return self.call_value(&function, args);
        }
        let function = self.eval(callee, env)?;
        let args = self.eval_elements(args, env)?;
        if !function.is_callable() {
            return Err(not_a_function(callee));
        }
        self.call_value(&function, args)
    }

    fn binary(&self, op: BinaryOperator, left: &Value, right: &Value) -> ScriptResult<Value> {
        use BinaryOperator::*;
        let numeric = |f: fn(f64, f64) -> f64| -> ScriptResult<Value> {
            Ok(Value::Number(f(left.to_number(), right.to_number())))
        };
        match op {
            Add => {
                if is_stringish(left) || is_stringish(right) {
                    let mut s = left.to_display_string();
                    s.push_str(&right.to_display_string());
                    self.make_string(s)
                } else {
                    numeric(|a, b| a + b)
                }
            }
            Sub => numeric(|a, b| a - b),
            Mul => numeric(|a, b| a * b),
            Div => numeric(|a, b| a / b),
            Rem => numeric(|a, b| a % b),
            Pow => numeric(f64::powf),
            Lt | Le | Gt | Ge => {
                let ordering = match (left, right) {
                    (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                    _ => left.to_number().partial_cmp(&right.to_number()),
                };
                let result = match ordering {
                    None => false,
                    Some(ordering) => match op {
                        Lt => ordering.is_lt(),
                        Le => ordering.is_le(),
                        Gt => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    },
                };
                Ok(Value::Bool(result))
            }
            LooseEq => Ok(Value::Bool(left.loose_equals(right))),
            LooseNe => Ok(Value::Bool(!left.loose_equals(right))),
            StrictEq => Ok(Value::Bool(left.strict_equals(right))),
            StrictNe => Ok(Value::Bool(!left.strict_equals(right))),
        }
    }

    // === Places ===

    fn resolve_place(&mut self, target: &Expr, env: &Env) -> ScriptResult<Place> {
        match target {
            Expr::Ident(name) => Ok(Place::Var(name.clone())),
            Expr::Member { object, property } => {
                let object = self.eval(object, env)?;
                Ok(Place::Property(object, Value::Str(property.clone())))
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                Ok(Place::Property(object, index))
            }
            _ => Err(ScriptError::Syntax {
                message: "invalid assignment target".into(),
                line: self.line,
                column: 1,
            }),
        }
    }

    fn read_place(&mut self, place: &Place, env: &Env) -> ScriptResult<Value> {
        match place {
            Place::Var(name) => lookup(env, name)
                .ok_or_else(|| ScriptError::Reference(format!("{} is not defined", name))),
            Place::Property(object, key) => self.get_index(object, key),
        }
    }

    fn write_place(&mut self, place: &Place, value: Value, env: &Env) -> ScriptResult<()> {
        match place {
            Place::Var(name) => assign(env, name, value),
            Place::Property(object, key) => self.set_property(object, key, value),
        }
    }

    // === Properties ===

    pub fn get_property(&self, object: &Value, key: &str) -> ScriptResult<Value> {
        match object {
            Value::Undefined | Value::Null => Err(ScriptError::type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                object.type_name(),
                key
            ))),
            Value::Object(map) => Ok(map.borrow().get(key).cloned().unwrap_or_default()),
            Value::Array(items) => {
                let items = items.borrow();
                if key == "length" {
                    return Ok(Value::Number(items.len() as f64));
                }
                Ok(key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default())
            }
            Value::Str(s) => {
                if key == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                Ok(key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::str(&c.to_string()))
                    .unwrap_or_default())
            }
            Value::Function(closure) if key == "name" => Ok(Value::str(
                closure.def.name.as_deref().unwrap_or(""),
            )),
            _ => Ok(Value::Undefined),
        }
    }

    fn get_index(&self, object: &Value, index: &Value) -> ScriptResult<Value> {
        if let (Value::Array(items), Value::Number(n)) = (object, index) {
            if n.fract() == 0.0 && *n >= 0.0 {
                return Ok(items.borrow().get(*n as usize).cloned().unwrap_or_default());
            }
            return Ok(Value::Undefined);
        }
        self.get_property(object, &index.to_display_string())
    }

    fn set_property(&self, object: &Value, key: &Value, value: Value) -> ScriptResult<()> {
        let key_text = key.to_display_string();
        match object {
            Value::Object(map) => {
                map.borrow_mut().insert(Rc::from(key_text), value);
                Ok(())
            }
            Value::Array(items) => {
                let index = match key {
                    Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 => Some(*n as usize),
                    _ => key_text.parse::<usize>().ok(),
                };
                if let Some(index) = index {
                    let len = items.borrow().len();
                    let new_len = index.saturating_add(1).max(len);
                    self.reserve_cells(new_len, new_len - len)?;
                    let mut items = items.borrow_mut();
                    if index >= items.len() {
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = value;
                    return Ok(());
                }
                if key_text == "length" {
                    let len = value.to_number();
                    if len.fract() != 0.0 || len < 0.0 {
                        return Err(ScriptError::Range("Invalid array length".into()));
                    }
                    let new_len = len as usize;
                    let current = items.borrow().len();
                    self.reserve_cells(new_len, new_len.saturating_sub(current))?;
                    items.borrow_mut().resize(new_len, Value::Undefined);
                    return Ok(());
                }
                Err(ScriptError::type_error(format!(
                    "Cannot set property '{}' on an array",
                    key_text
                )))
            }
            Value::Undefined | Value::Null => Err(ScriptError::type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                object.type_name(),
                key_text
            ))),
            other => Err(ScriptError::type_error(format!(
                "Cannot set property '{}' on {}",
                key_text,
                other.type_name()
            ))),
        }
    }

    // === Built-in methods ===

    fn call_builtin_method(&mut self, receiver: &Value, name: &str, args: &[Value]) -> ScriptResult<Option<Value>> {
        match receiver {
            Value::Array(items) => self.array_method(items, name, args),
            Value::Str(s) => self.string_method(s, name, args),
            Value::Number(n) => number_method(*n, name, args),
            _ => Ok(None),
        }
    }

    fn callback(&self, args: &[Value], method: &str) -> ScriptResult<Value> {
        match args.first() {
            Some(f) if f.is_callable() => Ok(f.clone()),
            Some(other) => Err(ScriptError::type_error(format!(
                "{} is not a function (in Array.{})",
                other.type_name(),
                method
            ))),
            None => Err(ScriptError::type_error(format!(
                "undefined is not a function (in Array.{})",
                method
            ))),
        }
    }

    fn array_method(
        &mut self,
        array: &Rc<RefCell<Vec<Value>>>,
        name: &str,
        args: &[Value],
    ) -> ScriptResult<Option<Value>> {
        let this = Value::Array(array.clone());
        let result = match name {
            "push" => {
                let len = array.borrow().len() + args.len();
                self.reserve_cells(len, args.len())?;
                array.borrow_mut().extend(args.iter().cloned());
                Value::Number(len as f64)
            }
            "pop" => array.borrow_mut().pop().unwrap_or_default(),
            "shift" => {
                let mut items = array.borrow_mut();
                if items.is_empty() {
                    Value::Undefined
                } else {
                    items.remove(0)
                }
            }
            "map" | "forEach" | "filter" | "find" | "findIndex" | "some" | "every" => {
                let f = self.callback(args, name)?;
                self.charge_cells(array.borrow().len())?;
                let items = array.borrow().clone();
                let mut mapped = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    let out = self.call_value(&f, vec![item.clone(), Value::Number(i as f64), this.clone()])?;
                    match name {
                        "map" => mapped.push(out),
                        "filter" if out.is_truthy() => mapped.push(item),
                        "find" if out.is_truthy() => return Ok(Some(item)),
                        "findIndex" if out.is_truthy() => return Ok(Some(Value::Number(i as f64))),
                        "some" if out.is_truthy() => return Ok(Some(Value::Bool(true))),
                        "every" if !out.is_truthy() => return Ok(Some(Value::Bool(false))),
                        _ => {}
                    }
                }
                match name {
                    "map" | "filter" => self.make_array(mapped)?,
                    "findIndex" => Value::Number(-1.0),
                    "some" => Value::Bool(false),
                    "every" => Value::Bool(true),
                    _ => Value::Undefined,
                }
            }
            "reduce" => {
                let f = self.callback(args, name)?;
                self.charge_cells(array.borrow().len())?;
                let items = array.borrow().clone();
                let mut iter = items.into_iter().enumerate();
                let mut acc = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => match iter.next() {
                        Some((_, first)) => first,
                        None => {
                            return Err(ScriptError::type_error(
                                "Reduce of empty array with no initial value",
                            ))
                        }
                    },
                };
                for (i, item) in iter {
                    acc = self.call_value(&f, vec![acc, item, Value::Number(i as f64), this.clone()])?;
                }
                acc
            }
            "concat" => {
                let total = args.iter().fold(array.borrow().len(), |acc, arg| {
                    acc.saturating_add(match arg {
                        Value::Array(other) => other.borrow().len(),
                        _ => 1,
                    })
                });
                self.reserve_cells(total, total)?;
                let mut items = Vec::with_capacity(total);
                items.extend(array.borrow().iter().cloned());
                for arg in args {
                    match arg {
                        Value::Array(other) => items.extend(other.borrow().iter().cloned()),
                        other => items.push(other.clone()),
                    }
                }
                Value::array(items)
            }
            "slice" => {
                let items = array.borrow();
                let (start, end) = slice_bounds(items.len(), args);
                self.charge_cells(end.saturating_sub(start))?;
                let sliced = items[start..end.max(start)].to_vec();
                Value::array(sliced)
            }
            "flat" => {
                let depth = match args.first() {
                    Some(Value::Number(d)) => d.max(0.0) as usize,
                    Some(Value::Undefined) | None => 1,
                    Some(other) => other.to_number().max(0.0) as usize,
                };
                let mut out = Vec::new();
                self.flatten_into(&array.borrow(), depth, &mut out)?;
                Value::array(out)
            }
            "includes" => {
                let needle = args.first().cloned().unwrap_or_default();
                Value::Bool(array.borrow().iter().any(|v| v.same_value_zero(&needle)))
            }
            "indexOf" => {
                let needle = args.first().cloned().unwrap_or_default();
                let index = array.borrow().iter().position(|v| v.strict_equals(&needle));
                Value::Number(index.map(|i| i as f64).unwrap_or(-1.0))
            }
            "join" => {
                let separator = match args.first() {
                    None | Some(Value::Undefined) => ",".to_string(),
                    Some(sep) => sep.to_display_string(),
                };
                let joined = array
                    .borrow()
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
                    .collect::<Vec<_>>()
                    .join(&separator);
                self.make_string(joined)?
            }
            "reverse" => {
                array.borrow_mut().reverse();
                this
            }
            _ => return Ok(None),
        };
        Ok(Some(result))
    }

    fn flatten_into(&self, items: &[Value], depth: usize, out: &mut Vec<Value>) -> ScriptResult<()> {
        for item in items {
            match item {
                Value::Array(inner) if depth > 0 => {
                    self.flatten_into(&inner.borrow(), depth - 1, out)?;
                }
                other => {
                    self.reserve_cells(out.len() + 1, 1)?;
                    out.push(other.clone());
                }
            }
        }
        Ok(())
    }

    fn string_method(&mut self, s: &Rc<str>, name: &str, args: &[Value]) -> ScriptResult<Option<Value>> {
        let arg = |i: usize| args.get(i).map(|v| v.to_display_string()).unwrap_or_default();
        if matches!(name, "toUpperCase" | "toLowerCase" | "trim" | "slice" | "split") {
            self.meter.charge_alloc(s.len())?;
        }
        let result = match name {
            "includes" => Value::Bool(s.contains(arg(0).as_str())),
            "startsWith" => Value::Bool(s.starts_with(arg(0).as_str())),
            "endsWith" => Value::Bool(s.ends_with(arg(0).as_str())),
            "toUpperCase" => Value::str(&s.to_uppercase()),
            "toLowerCase" => Value::str(&s.to_lowercase()),
            "trim" => Value::str(s.trim()),
            "slice" => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = slice_bounds(chars.len(), args);
                Value::str(&chars[start..end.max(start)].iter().collect::<String>())
            }
            "split" => {
                let separator = arg(0);
                let parts: Vec<Value> = if separator.is_empty() {
                    s.chars().map(|c| Value::str(&c.to_string())).collect()
                } else {
                    s.split(separator.as_str()).map(Value::str).collect()
                };
                self.make_array(parts)?
            }
            _ => return Ok(None),
        };
        Ok(Some(result))
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        // Closures hold their defining scope, which usually holds them back.
        for weak in self.captured.drain(..) {
            if let Some(scope) = weak.upgrade() {
                scope.borrow_mut().clear();
            }
        }
    }
}

fn number_method(n: f64, name: &str, args: &[Value]) -> ScriptResult<Option<Value>> {
    match name {
        "toFixed" => {
            let digits = args.first().map(|v| v.to_number()).unwrap_or(0.0);
            if !(0.0..=100.0).contains(&digits) {
                return Err(ScriptError::Range("toFixed() digits argument must be between 0 and 100".into()));
            }
            Ok(Some(Value::str(&format!("{:.*}", digits as usize, n))))
        }
        "toString" => Ok(Some(Value::str(&super::value::format_number(n)))),
        _ => Ok(None),
    }
}

/// JavaScript `slice(start, end)` bounds with negative indices from the end.
fn slice_bounds(len: usize, args: &[Value]) -> (usize, usize) {
    let resolve = |v: Option<&Value>, default: usize| -> usize {
        match v {
            None | Some(Value::Undefined) => default,
            Some(v) => {
                let n = v.to_number();
                if n.is_nan() {
                    0
                } else if n < 0.0 {
                    (len as f64 + n.trunc()).max(0.0) as usize
                } else {
                    (n.trunc() as usize).min(len)
                }
            }
        }
    };
    (resolve(args.first(), 0), resolve(args.get(1), len))
}

fn is_stringish(value: &Value) -> bool {
    !matches!(
        value,
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_)
    )
}

fn thrown_message(value: &Value) -> String {
    if let Value::Object(map) = value {
        if let Some(message) = map.borrow().get("message") {
            return message.to_display_string();
        }
    }
    value.to_display_string()
}

fn describe_expr(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.to_string(),
        Expr::Member { object, property } => format!("{}.{}", describe_expr(object), property),
        Expr::Index { object, .. } => format!("{}[...]", describe_expr(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe_expr(callee)),
        _ => "expression".to_string(),
    }
}

fn not_a_function(callee: &Expr) -> ScriptError {
    ScriptError::type_error(format!("{} is not a function", describe_expr(callee)))
}

use std::fmt;
use std::sync::Arc;

const INDENT: &str = "    ";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    items: Vec<Item>,
}

impl Module {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn extend<I: IntoIterator<Item = Item>>(&mut self, items: I) {
        self.items.extend(items);
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_cuda(&self) -> String {
        let mut out = String::new();
        let mut ctx = RenderContext::new(&mut out, 0);
        for (idx, item) in self.items.iter().enumerate() {
            if idx > 0 && item.is_block_like() {
                ctx.blank_line();
            }
            item.render(&mut ctx);
        }
        out
    }
}

impl From<Vec<Item>> for Module {
    fn from(items: Vec<Item>) -> Self {
        Self { items }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Comment(String),
    Include(String),
    Alias { name: String, ty: Type },
    Constant(Constant),
    ConstantArray(ConstantArray),
    Function(Function),
}

impl Item {
    fn is_block_like(&self) -> bool {
        matches!(self, Item::Function(_) | Item::Comment(_))
    }

    fn render(&self, ctx: &mut RenderContext<'_>) {
        match self {
            Item::Comment(text) => ctx.line(&format!("// {}", text)),
            Item::Include(header) => ctx.line(&format!("#include <{}>", header)),
            Item::Alias { name, ty } => ctx.line(&format!("using {} = {};", name, ty)),
            Item::Constant(constant) => constant.render(ctx),
            Item::ConstantArray(array) => array.render(ctx),
            Item::Function(function) => function.render(ctx),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// `constexpr`, usable on host and device.
    Constexpr,
    /// `__constant__`, device constant memory.
    DeviceConstant,
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Constexpr => write!(f, "constexpr"),
            Storage::DeviceConstant => write!(f, "__constant__"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub name: String,
    pub ty: Type,
    pub storage: Storage,
    pub value: Expr,
}

impl Constant {
    pub fn new(name: impl Into<String>, ty: Type, storage: Storage, value: impl Into<Expr>) -> Self {
        Self {
            name: name.into(),
            ty,
            storage,
            value: value.into(),
        }
    }

    fn render(&self, ctx: &mut RenderContext<'_>) {
        ctx.line(&format!(
            "{} {} {} = {};",
            self.storage, self.ty, self.name, self.value
        ));
    }
}

/// One array dimension: the expression written in the declaration and the
/// extent it evaluates to (needed to lay out nested initialisers).
#[derive(Debug, Clone, PartialEq)]
pub struct Extent {
    pub expr: Expr,
    pub len: usize,
}

impl Extent {
    pub fn new(expr: impl Into<Expr>, len: usize) -> Self {
        Self {
            expr: expr.into(),
            len,
        }
    }
}

/// A constant table with a row-major flattened initialiser.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantArray {
    pub name: String,
    pub ty: Type,
    pub storage: Storage,
    pub shape: Vec<Extent>,
    pub values: Vec<Expr>,
}

impl ConstantArray {
    pub fn new(
        name: impl Into<String>,
        ty: Type,
        storage: Storage,
        shape: Vec<Extent>,
        values: Vec<Expr>,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
            storage,
            shape,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.shape.iter().map(|extent| extent.len).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn render(&self, ctx: &mut RenderContext<'_>) {
        let dims: String = self
            .shape
            .iter()
            .map(|extent| format!("[{}]", extent.expr))
            .collect();
        let init = nested_initializer(&self.values, &self.shape);
        ctx.line(&format!(
            "{} {} {}{} = {};",
            self.storage, self.ty, self.name, dims, init
        ));
    }
}

fn nested_initializer(values: &[Expr], shape: &[Extent]) -> String {
    match shape {
        [] | [_] => {
            let inner = values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{}}}", inner)
        }
        [_, rest @ ..] => {
            let stride: usize = rest.iter().map(|extent| extent.len).product();
            let rows = values
                .chunks(stride.max(1))
                .map(|row| nested_initializer(row, rest))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{}}}", rows)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnQualifier {
    Global,
    Device,
    Host,
    ForceInline,
}

impl fmt::Display for FnQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FnQualifier::Global => write!(f, "__global__"),
            FnQualifier::Device => write!(f, "__device__"),
            FnQualifier::Host => write!(f, "__host__"),
            FnQualifier::ForceInline => write!(f, "__forceinline__"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub qualifiers: Vec<FnQualifier>,
    pub return_type: Type,
    pub params: Vec<Param>,
    pub body: Block,
}

impl Function {
    pub fn new(
        name: impl Into<String>,
        qualifiers: Vec<FnQualifier>,
        return_type: Type,
        params: Vec<Param>,
        body: Block,
    ) -> Self {
        Self {
            name: name.into(),
            qualifiers,
            return_type,
            params,
            body,
        }
    }

    fn render(&self, ctx: &mut RenderContext<'_>) {
        let mut head = String::new();
        for qualifier in &self.qualifiers {
            head.push_str(&format!("{} ", qualifier));
        }
        let params = self
            .params
            .iter()
            .map(|param| param.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        ctx.line(&format!(
            "{}{} {}({}) {{",
            head, self.return_type, self.name, params
        ));
        ctx.indent();
        self.body.render(ctx);
        ctx.dedent();
        ctx.line("}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ty, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }

    pub fn push(&mut self, stmt: Stmt) {
        self.stmts.push(stmt);
    }

    pub fn extend<I: IntoIterator<Item = Stmt>>(&mut self, stmts: I) {
        self.stmts.extend(stmts);
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    /// Renders the statements at the given indentation level.
    pub fn to_cuda(&self, indent: usize) -> String {
        let mut out = String::new();
        let mut ctx = RenderContext::new(&mut out, indent);
        self.render(&mut ctx);
        out
    }

    fn render(&self, ctx: &mut RenderContext<'_>) {
        for stmt in &self.stmts {
            stmt.render(ctx);
        }
    }
}

impl From<Vec<Stmt>> for Block {
    fn from(stmts: Vec<Stmt>) -> Self {
        Self::new(stmts)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Comment(String),
    Blank,
    /// `const ty name = expr;`
    Let {
        name: String,
        ty: Type,
        expr: Expr,
    },
    Var {
        name: String,
        ty: Type,
        expr: Option<Expr>,
    },
    Array {
        name: String,
        ty: Type,
        len: Expr,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    AssignOp {
        target: Expr,
        op: AssignOp,
        value: Expr,
    },
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
    },
    /// `for (index_t var = start; var < end; ++var)`
    For {
        var: String,
        start: Expr,
        end: Expr,
        unroll: bool,
        body: Block,
    },
    Return(Option<Expr>),
    Call(Expr),
    /// Bare `{ ... }` block; names declared inside may shadow outer ones.
    Scope(Block),
}

impl Stmt {
    pub fn comment(text: impl Into<String>) -> Self {
        Stmt::Comment(text.into())
    }

    pub fn let_(name: impl Into<String>, ty: Type, expr: impl Into<Expr>) -> Self {
        Stmt::Let {
            name: name.into(),
            ty,
            expr: expr.into(),
        }
    }

    pub fn var(name: impl Into<String>, ty: Type, expr: impl Into<Expr>) -> Self {
        Stmt::Var {
            name: name.into(),
            ty,
            expr: Some(expr.into()),
        }
    }

    pub fn array(name: impl Into<String>, ty: Type, len: impl Into<Expr>) -> Self {
        Stmt::Array {
            name: name.into(),
            ty,
            len: len.into(),
        }
    }

    pub fn assign(target: impl Into<Expr>, value: impl Into<Expr>) -> Self {
        Stmt::Assign {
            target: target.into(),
            value: value.into(),
        }
    }

    pub fn assign_op(target: impl Into<Expr>, op: AssignOp, value: impl Into<Expr>) -> Self {
        Stmt::AssignOp {
            target: target.into(),
            op,
            value: value.into(),
        }
    }

    pub fn if_(cond: Expr, then_block: impl Into<Block>) -> Self {
        Stmt::If {
            cond,
            then_block: then_block.into(),
            else_block: None,
        }
    }

    pub fn if_else(cond: Expr, then_block: impl Into<Block>, else_block: impl Into<Block>) -> Self {
        Stmt::If {
            cond,
            then_block: then_block.into(),
            else_block: Some(else_block.into()),
        }
    }

    pub fn scope(body: impl Into<Block>) -> Self {
        Stmt::Scope(body.into())
    }

    /// Loop over `0..end` with an unroll hint.
    pub fn for_range(var: impl Into<String>, end: impl Into<Expr>, body: impl Into<Block>) -> Self {
        Stmt::For {
            var: var.into(),
            start: Expr::lit_int(0),
            end: end.into(),
            unroll: true,
            body: body.into(),
        }
    }

    fn render(&self, ctx: &mut RenderContext<'_>) {
        match self {
            Stmt::Comment(text) => ctx.line(&format!("// {}", text)),
            Stmt::Blank => ctx.blank_line(),
            Stmt::Let { name, ty, expr } => {
                ctx.line(&format!("const {} {} = {};", ty, name, expr));
            }
            Stmt::Var { name, ty, expr } => match expr {
                Some(expr) => ctx.line(&format!("{} {} = {};", ty, name, expr)),
                None => ctx.line(&format!("{} {};", ty, name)),
            },
            Stmt::Array { name, ty, len } => {
                ctx.line(&format!("{} {}[{}];", ty, name, len));
            }
            Stmt::Assign { target, value } => {
                ctx.line(&format!("{} = {};", target, value));
            }
            Stmt::AssignOp { target, op, value } => {
                ctx.line(&format!("{} {}= {};", target, op, value));
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => render_if(ctx, cond, then_block, else_block.as_ref(), false),
            Stmt::For {
                var,
                start,
                end,
                unroll,
                body,
            } => {
                if *unroll {
                    ctx.raw_line("#pragma unroll");
                }
                ctx.line(&format!(
                    "for (index_t {var} = {start}; {var} < {end}; ++{var}) {{"
                ));
                ctx.indent();
                body.render(ctx);
                ctx.dedent();
                ctx.line("}");
            }
            Stmt::Return(expr) => match expr {
                Some(expr) => ctx.line(&format!("return {};", expr)),
                None => ctx.line("return;"),
            },
            Stmt::Call(expr) => ctx.line(&format!("{};", expr)),
            Stmt::Scope(body) => {
                ctx.line("{");
                ctx.indent();
                body.render(ctx);
                ctx.dedent();
                ctx.line("}");
            }
        }
    }
}

fn render_if(
    ctx: &mut RenderContext<'_>,
    cond: &Expr,
    then_block: &Block,
    else_block: Option<&Block>,
    chained: bool,
) {
    if chained {
        ctx.line(&format!("}} else if ({}) {{", cond));
    } else {
        ctx.line(&format!("if ({}) {{", cond));
    }
    ctx.indent();
    then_block.render(ctx);
    ctx.dedent();
    match else_block {
        Some(block) => match block.stmts.as_slice() {
            [Stmt::If {
                cond,
                then_block,
                else_block,
            }] => render_if(ctx, cond, then_block, else_block.as_ref(), true),
            _ => {
                ctx.line("} else {");
                ctx.indent();
                block.render(ctx);
                ctx.dedent();
                ctx.line("}");
            }
        },
        None => ctx.line("}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignOp::Add => write!(f, "+"),
            AssignOp::Sub => write!(f, "-"),
            AssignOp::Mul => write!(f, "*"),
            AssignOp::Div => write!(f, "/"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Bool,
    Int,
    /// `index_t`, the signed lattice index type.
    Index,
    /// `byte_t`, mask element type.
    Byte,
    /// `scalar_t`, the distribution element type.
    Scalar,
    Double,
    /// `at::Tensor` on the host side.
    Tensor,
    Const(Box<Type>),
    Ptr(Box<Type>),
    Custom(String),
}

impl Type {
    pub fn const_(inner: Type) -> Self {
        Type::Const(Box::new(inner))
    }

    pub fn ptr(inner: Type) -> Self {
        Type::Ptr(Box::new(inner))
    }

    pub fn const_ptr(inner: Type) -> Self {
        Type::ptr(Type::const_(inner))
    }

    /// Strips `const` qualifiers at every level.
    pub fn unqualified(&self) -> &Type {
        match self {
            Type::Const(inner) => inner.unqualified(),
            other => other,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.unqualified(), Type::Ptr(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Index => write!(f, "index_t"),
            Type::Byte => write!(f, "byte_t"),
            Type::Scalar => write!(f, "scalar_t"),
            Type::Double => write!(f, "double"),
            Type::Tensor => write!(f, "at::Tensor"),
            Type::Const(inner) => write!(f, "const {}", inner),
            Type::Ptr(inner) => write!(f, "{}*", inner),
            Type::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Shared, immutable expression tree. Cloning is a reference count bump.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr(Arc<ExprNode>);

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExprNode {
    Literal(Literal),
    Ident(String),
    Field { base: Expr, field: String },
    Index { base: Expr, index: Expr },
    Unary { op: UnaryOp, expr: Expr },
    Binary { left: Expr, op: BinaryOp, right: Expr },
    Call { callee: String, args: Vec<Expr> },
}

impl Expr {
    fn alloc(node: ExprNode) -> Self {
        Expr(Arc::new(node))
    }

    pub(crate) fn node(&self) -> &ExprNode {
        &self.0
    }

    fn unary(op: UnaryOp, expr: Expr) -> Self {
        Expr::alloc(ExprNode::Unary { op, expr })
    }

    fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::alloc(ExprNode::Binary { left, op, right })
    }

    fn format_f64_literal(value: f64) -> String {
        let mut out = if value.is_finite() {
            format!("{value}")
        } else if value.is_nan() {
            "NAN".to_string()
        } else if value.is_sign_positive() {
            "INFINITY".to_string()
        } else {
            "-INFINITY".to_string()
        };
        if value.is_finite() && !out.contains('.') && !out.contains('e') && !out.contains('E') {
            out.push_str(".0");
        }
        out
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Expr::alloc(ExprNode::Ident(name.into()))
    }

    pub fn lit_bool(value: bool) -> Self {
        Expr::alloc(ExprNode::Literal(Literal::Bool(value)))
    }

    pub fn lit_int(value: i64) -> Self {
        Expr::alloc(ExprNode::Literal(Literal::Int(value)))
    }

    pub fn lit_f64(value: f64) -> Self {
        Expr::alloc(ExprNode::Literal(Literal::Float(value)))
    }

    pub fn field(self, field: impl Into<String>) -> Self {
        Expr::alloc(ExprNode::Field {
            base: self,
            field: field.into(),
        })
    }

    pub fn index(self, index: impl Into<Expr>) -> Self {
        Expr::alloc(ExprNode::Index {
            base: self,
            index: index.into(),
        })
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::alloc(ExprNode::Call {
            callee: name.into(),
            args,
        })
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Self {
        Expr::binary(self, BinaryOp::Less, rhs.into())
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Self {
        Expr::binary(self, BinaryOp::LessEq, rhs.into())
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Self {
        Expr::binary(self, BinaryOp::Greater, rhs.into())
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Self {
        Expr::binary(self, BinaryOp::GreaterEq, rhs.into())
    }

    pub fn eq(self, rhs: impl Into<Expr>) -> Self {
        Expr::binary(self, BinaryOp::Equal, rhs.into())
    }

    pub fn ne(self, rhs: impl Into<Expr>) -> Self {
        Expr::binary(self, BinaryOp::NotEqual, rhs.into())
    }

    /// Folds `exprs` with `||`; `None` for an empty input.
    pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(|acc, e| acc | e)
    }

    /// Folds `exprs` with `+`; `None` for an empty input.
    pub fn sum(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(|acc, e| acc + e)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render_expr(self, f, Precedence::Lowest)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(value) => write!(f, "{}", if *value { "true" } else { "false" }),
            Literal::Int(value) => write!(f, "{}", value),
            Literal::Float(value) => write!(f, "{}", Expr::format_f64_literal(*value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum UnaryOp {
    Negate,
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Negate => write!(f, "-"),
            UnaryOp::Not => write!(f, "!"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOp {
    fn precedence(self) -> Precedence {
        match self {
            BinaryOp::Or => Precedence::Or,
            BinaryOp::And => Precedence::And,
            BinaryOp::Equal | BinaryOp::NotEqual => Precedence::Equality,
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
                Precedence::Comparison
            }
            BinaryOp::Add | BinaryOp::Sub => Precedence::Sum,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => Precedence::Product,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Rem => write!(f, "%"),
            BinaryOp::Less => write!(f, "<"),
            BinaryOp::LessEq => write!(f, "<="),
            BinaryOp::Greater => write!(f, ">"),
            BinaryOp::GreaterEq => write!(f, ">="),
            BinaryOp::Equal => write!(f, "=="),
            BinaryOp::NotEqual => write!(f, "!="),
            BinaryOp::And => write!(f, "&&"),
            BinaryOp::Or => write!(f, "||"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Or,
    And,
    Equality,
    Comparison,
    Sum,
    Product,
    Prefix,
    Postfix,
}

fn next_precedence(prec: Precedence) -> Precedence {
    match prec {
        Precedence::Lowest => Precedence::Or,
        Precedence::Or => Precedence::And,
        Precedence::And => Precedence::Equality,
        Precedence::Equality => Precedence::Comparison,
        Precedence::Comparison => Precedence::Sum,
        Precedence::Sum => Precedence::Product,
        Precedence::Product => Precedence::Prefix,
        Precedence::Prefix | Precedence::Postfix => Precedence::Postfix,
    }
}

fn render_expr(expr: &Expr, f: &mut fmt::Formatter<'_>, parent_prec: Precedence) -> fmt::Result {
    match expr.node() {
        ExprNode::Literal(Literal::Float(value)) if *value < 0.0 && parent_prec > Precedence::Sum => {
            write!(f, "({})", Expr::format_f64_literal(*value))
        }
        ExprNode::Literal(Literal::Int(value)) if *value < 0 && parent_prec > Precedence::Sum => {
            write!(f, "({})", value)
        }
        ExprNode::Literal(lit) => write!(f, "{}", lit),
        ExprNode::Ident(name) => write!(f, "{}", name),
        ExprNode::Field { base, field } => {
            render_postfix_base(base, f)?;
            write!(f, ".{}", field)
        }
        ExprNode::Index { base, index } => {
            render_postfix_base(base, f)?;
            write!(f, "[")?;
            render_expr(index, f, Precedence::Lowest)?;
            write!(f, "]")
        }
        ExprNode::Unary { op, expr } => {
            let prec = Precedence::Prefix;
            let needs_paren = prec < parent_prec;
            if needs_paren {
                write!(f, "(")?;
            }
            write!(f, "{}", op)?;
            render_expr(expr, f, prec)?;
            if needs_paren {
                write!(f, ")")?;
            }
            Ok(())
        }
        ExprNode::Binary { left, op, right } => {
            let prec = op.precedence();
            let needs_paren = prec < parent_prec;
            if needs_paren {
                write!(f, "(")?;
            }
            render_expr(left, f, prec)?;
            write!(f, " {} ", op)?;
            // Subtraction, division and modulo are not associative; preserve RHS grouping.
            let right_prec = match op {
                BinaryOp::Sub | BinaryOp::Div | BinaryOp::Rem => next_precedence(prec),
                _ => prec,
            };
            render_expr(right, f, right_prec)?;
            if needs_paren {
                write!(f, ")")?;
            }
            Ok(())
        }
        ExprNode::Call { callee, args } => {
            write!(f, "{}(", callee)?;
            for (idx, arg) in args.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                render_expr(arg, f, Precedence::Lowest)?;
            }
            write!(f, ")")
        }
    }
}

fn render_postfix_base(base: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let needs_paren = expr_precedence(base) < Precedence::Postfix;
    if needs_paren {
        write!(f, "(")?;
    }
    render_expr(base, f, Precedence::Postfix)?;
    if needs_paren {
        write!(f, ")")?;
    }
    Ok(())
}

fn expr_precedence(expr: &Expr) -> Precedence {
    match expr.node() {
        ExprNode::Literal(_) | ExprNode::Ident(_) => Precedence::Postfix,
        ExprNode::Field { .. } | ExprNode::Index { .. } | ExprNode::Call { .. } => {
            Precedence::Postfix
        }
        ExprNode::Unary { .. } => Precedence::Prefix,
        ExprNode::Binary { op, .. } => op.precedence(),
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::ident(value)
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::ident(value)
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::lit_bool(value)
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Expr::lit_int(i64::from(value))
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::lit_int(value)
    }
}

impl From<usize> for Expr {
    fn from(value: usize) -> Self {
        let value = i64::try_from(value).expect("usize literal does not fit in i64");
        Expr::lit_int(value)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::lit_f64(value)
    }
}

macro_rules! impl_binary_ops {
    ($($trait:ident, $method:ident, $op:expr;)*) => {
        $(
            impl std::ops::$trait for Expr {
                type Output = Expr;

                fn $method(self, rhs: Expr) -> Self::Output {
                    Expr::binary(self, $op, rhs)
                }
            }

            impl std::ops::$trait<i32> for Expr {
                type Output = Expr;

                fn $method(self, rhs: i32) -> Self::Output {
                    Expr::binary(self, $op, Expr::from(rhs))
                }
            }

            impl std::ops::$trait<f64> for Expr {
                type Output = Expr;

                fn $method(self, rhs: f64) -> Self::Output {
                    Expr::binary(self, $op, Expr::from(rhs))
                }
            }

            impl std::ops::$trait<&str> for Expr {
                type Output = Expr;

                fn $method(self, rhs: &str) -> Self::Output {
                    Expr::binary(self, $op, Expr::from(rhs))
                }
            }
        )*
    };
}

impl_binary_ops! {
    Add, add, BinaryOp::Add;
    Sub, sub, BinaryOp::Sub;
    Mul, mul, BinaryOp::Mul;
    Div, div, BinaryOp::Div;
    Rem, rem, BinaryOp::Rem;
}

impl std::ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Self::Output {
        Expr::unary(UnaryOp::Negate, self)
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Self::Output {
        Expr::unary(UnaryOp::Not, self)
    }
}

impl std::ops::BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Self::Output {
        Expr::binary(self, BinaryOp::And, rhs)
    }
}

impl std::ops::BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Self::Output {
        Expr::binary(self, BinaryOp::Or, rhs)
    }
}

struct RenderContext<'a> {
    output: &'a mut String,
    indent: usize,
}

impl<'a> RenderContext<'a> {
    fn new(output: &'a mut String, indent: usize) -> Self {
        Self { output, indent }
    }

    fn indent(&mut self) {
        self.indent += 1;
    }

    fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.output.push_str(INDENT);
        }
        self.output.push_str(text);
        self.output.push('\n');
    }

    /// Preprocessor lines start at column zero.
    fn raw_line(&mut self, text: &str) {
        self.output.push_str(text);
        self.output.push('\n');
    }

    fn blank_line(&mut self) {
        self.output.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expr_builders_render_expected_cuda() {
        let expr = Expr::ident("a") + Expr::ident("b") * Expr::ident("c");
        assert_eq!(expr.to_string(), "a + b * c");

        let expr = Expr::ident("e").index(Expr::ident("i")).index(0);
        assert_eq!(expr.to_string(), "e[i][0]");

        let expr = Expr::ident("blockIdx").field("x") * Expr::ident("blockDim").field("x")
            + Expr::ident("threadIdx").field("x");
        assert_eq!(expr.to_string(), "blockIdx.x * blockDim.x + threadIdx.x");

        let expr = Expr::call("offset", vec![Expr::ident("q_"), 3.into()]);
        assert_eq!(expr.to_string(), "offset(q_, 3)");

        let expr: Expr = 1.0.into();
        assert_eq!(expr.to_string(), "1.0");

        let expr: Expr = (4.0 / 9.0).into();
        assert_eq!(expr.to_string(), format!("{}", 4.0 / 9.0));
    }

    #[test]
    fn expr_renders_non_associative_rhs_with_parentheses() {
        let a = || Expr::ident("a");
        let b = || Expr::ident("b");
        let c = || Expr::ident("c");

        assert_eq!((a() - (b() - c())).to_string(), "a - (b - c)");
        assert_eq!((a() / (b() * c())).to_string(), "a / (b * c)");
        assert_eq!(((a() + b()) * c()).to_string(), "(a + b) * c");
        assert_eq!((a() * -1).to_string(), "a * (-1)");
        assert_eq!((-(a() + b())).to_string(), "-(a + b)");
    }

    #[test]
    fn logical_folds_render_flat() {
        let cond = Expr::any([
            Expr::ident("x").ge("nx"),
            Expr::ident("y").ge("ny"),
        ])
        .unwrap();
        assert_eq!(cond.to_string(), "x >= nx || y >= ny");
        assert!(Expr::sum(Vec::new()).is_none());
    }

    #[test]
    fn else_if_chains_render_flat() {
        let x = Expr::ident("x_");
        let stmt = Stmt::if_else(
            x.clone().lt(0),
            vec![Stmt::assign_op(x.clone(), AssignOp::Add, Expr::ident("n"))],
            vec![Stmt::if_(
                x.clone().ge("n"),
                vec![Stmt::assign_op(x, AssignOp::Sub, Expr::ident("n"))],
            )],
        );
        let out = Block::new(vec![stmt]).to_cuda(1);
        assert_eq!(
            out,
            "    if (x_ < 0) {\n        x_ += n;\n    } else if (x_ >= n) {\n        x_ -= n;\n    }\n"
        );
    }

    #[test]
    fn unrolled_loops_put_pragma_at_column_zero() {
        let body = vec![Stmt::assign(Expr::ident("f_reg").index("i"), 0.0)];
        let out = Block::new(vec![Stmt::for_range("i", "q", body)]).to_cuda(1);
        assert_eq!(
            out,
            "#pragma unroll\n    for (index_t i = 0; i < q; ++i) {\n        f_reg[i] = 0.0;\n    }\n"
        );
    }

    #[test]
    fn constant_arrays_render_nested_initializers() {
        let values = [0, 0, 1, 0, -1, 0].iter().map(|&v| Expr::from(v)).collect();
        let array = ConstantArray::new(
            "e",
            Type::Index,
            Storage::DeviceConstant,
            vec![Extent::new("q", 3), Extent::new("d", 2)],
            values,
        );
        let module = Module::from(vec![Item::ConstantArray(array)]);
        assert_eq!(
            module.to_cuda(),
            "__constant__ index_t e[q][d] = {{0, 0}, {1, 0}, {-1, 0}};\n"
        );
    }

    #[test]
    fn module_renders_functions_and_types() {
        let module = Module::from(vec![
            Item::Alias {
                name: "byte_t".to_string(),
                ty: Type::Custom("unsigned char".to_string()),
            },
            Item::Function(Function::new(
                "node_offset",
                vec![FnQualifier::Device, FnQualifier::ForceInline],
                Type::Index,
                vec![Param::new("x_", Type::Index), Param::new("mask", Type::const_ptr(Type::Byte))],
                Block::new(vec![Stmt::Return(Some(Expr::ident("x_")))]),
            )),
        ]);
        let output = module.to_cuda();
        assert!(output.contains("using byte_t = unsigned char;"));
        assert!(output.contains(
            "__device__ __forceinline__ index_t node_offset(index_t x_, const byte_t* mask) {"
        ));
        assert!(output.contains("    return x_;"));
    }

    #[test]
    fn built_statements_render_on_another_thread() {
        let x = Expr::ident("x_");
        let block = Block::new(vec![Stmt::if_(
            x.clone().ge("n"),
            vec![Stmt::assign_op(x, AssignOp::Sub, Expr::ident("n"))],
        )]);
        let expected = block.to_cuda(0);
        let rendered = std::thread::spawn(move || {
            // Expressions built here must not disturb the moved block.
            let _other = Expr::ident("y") * 2.0;
            block.to_cuda(0)
        })
        .join()
        .unwrap();
        assert_eq!(rendered, expected);
    }

    #[test]
    fn bare_scopes_render_as_braced_blocks() {
        let block = Block::new(vec![Stmt::scope(vec![Stmt::var("a", Type::Scalar, 0.0)])]);
        assert_eq!(block.to_cuda(1), "    {\n        scalar_t a = 0.0;\n    }\n");
    }

    #[test]
    fn equal_trees_compare_equal() {
        let build = || Expr::call("offset", vec![Expr::ident("i"), Expr::ident("x") + 1]);
        assert_eq!(build(), build());
        assert_ne!(build(), Expr::ident("i"));
    }
}

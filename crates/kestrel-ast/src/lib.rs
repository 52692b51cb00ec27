pub mod span {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Span {
        pub start: u32,
        pub end: u32,
    }

    impl Span {
        pub const fn new(start: u32, end: u32) -> Self {
            Span { start, end }
        }

        /// Smallest span covering both `self` and `other`.
        pub fn to(self, other: Span) -> Span {
            Span {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            }
        }
    }
}

pub mod ast {
    //! Untyped surface tree.
    //!
    //! This is what an external parser hands to the typer. The constructor
    //! helpers (`Expr::var`, `Expr::call`, ...) build nodes with empty spans
    //! and exist for tooling and tests that assemble trees by hand.

    use super::span::Span;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Module {
        pub items: Vec<Toplevel>,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum Toplevel {
        Define(Define),
        Effect(EffectDecl),
        Record(RecordDecl),
        Expr(Expr),
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Define {
        pub name: Ident,
        pub ann: Option<TypeExpr>,
        pub value: Expr,
        pub span: Span,
    }

    /// `effect Log { log: (string) => void }`
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct EffectDecl {
        pub name: Ident,
        pub constrs: Vec<EffectConstr>,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct EffectConstr {
        pub name: Ident,
        pub args: Vec<TypeExpr>,
        pub ret: TypeExpr,
        pub span: Span,
    }

    /// `type Person = { ...Named, age: int }`
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RecordDecl {
        pub name: Ident,
        pub items: Vec<RecordItem>,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum RecordItem {
        Row { name: Ident, ty: TypeExpr },
        /// Include another record type as a subtype.
        Spread(Ident),
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Ident {
        pub text: String,
        pub span: Span,
    }

    /// A type variable binder, optionally bounded by record subtypes: `<T: Named>`.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TypeVar {
        pub name: Ident,
        pub subtypes: Vec<Ident>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum TypeExpr {
        Named(Ident),
        /// `<T>{e}(A, B) ={Log, e}> R`
        Lambda {
            type_vars: Vec<TypeVar>,
            effect_vars: Vec<Ident>,
            args: Vec<TypeExpr>,
            effects: Vec<Ident>,
            ret: Box<TypeExpr>,
            span: Span,
        },
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Param {
        pub name: Ident,
        pub ty: TypeExpr,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LambdaExpr {
        pub type_vars: Vec<TypeVar>,
        pub effect_vars: Vec<Ident>,
        /// `None` means "infer from the body".
        pub effects: Option<Vec<Ident>>,
        pub args: Vec<Param>,
        pub ret: Option<TypeExpr>,
        pub body: Expr,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum Expr {
        Lit(Lit, Span),
        Var(Ident),
        Lambda(Box<LambdaExpr>),
        Apply {
            target: Box<Expr>,
            args: Vec<Expr>,
            type_args: Vec<TypeExpr>,
            /// `f{Log}(x)`; `None` when no effect argument list was written.
            effect_args: Option<Vec<Ident>>,
            span: Span,
        },
        Attribute {
            target: Box<Expr>,
            name: Ident,
            span: Span,
        },
        Binary {
            lhs: Box<Expr>,
            op: BinOp,
            rhs: Box<Expr>,
            span: Span,
        },
        If {
            cond: Box<Expr>,
            yes: Box<Expr>,
            no: Option<Box<Expr>>,
            span: Span,
        },
        Block {
            stmts: Vec<Stmt>,
            span: Span,
        },
        Record {
            name: Ident,
            rows: Vec<RecordRow>,
            span: Span,
        },
        /// `raise!(Log.log("hi"))`
        Raise {
            effect: Ident,
            constr: Ident,
            args: Vec<Expr>,
            span: Span,
        },
        Handle {
            target: Box<Expr>,
            cases: Vec<HandleCase>,
            pure: Box<PureCase>,
            span: Span,
        },
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum Stmt {
        Let {
            name: Ident,
            ann: Option<TypeExpr>,
            value: Expr,
            span: Span,
        },
        Expr(Expr),
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum RecordRow {
        Field { name: Ident, value: Expr },
        Spread(Expr),
    }

    /// `Log.log((v) => k) => body`
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct HandleCase {
        pub effect: Ident,
        pub constr: Ident,
        pub args: Vec<Ident>,
        pub k: Ident,
        pub body: Expr,
        pub span: Span,
    }

    /// `pure(a) => body`
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PureCase {
        pub arg: Ident,
        pub body: Expr,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum Lit {
        Int(i64),
        Float(f64),
        Str(String),
        Bool(bool),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum BinOp {
        Add,
        Sub,
        Mul,
        Div,
        Concat,
        Eq,
        Lt,
        Gt,
        Le,
        Ge,
    }

    impl BinOp {
        /// The builtin name the operator resolves through.
        pub fn symbol(self) -> &'static str {
            match self {
                BinOp::Add => "+",
                BinOp::Sub => "-",
                BinOp::Mul => "*",
                BinOp::Div => "/",
                BinOp::Concat => "++",
                BinOp::Eq => "==",
                BinOp::Lt => "<",
                BinOp::Gt => ">",
                BinOp::Le => "<=",
                BinOp::Ge => ">=",
            }
        }
    }

    impl Expr {
        pub fn span(&self) -> Span {
            match self {
                Expr::Lit(_, span) => *span,
                Expr::Var(ident) => ident.span,
                Expr::Lambda(lambda) => lambda.span,
                Expr::Apply { span, .. }
                | Expr::Attribute { span, .. }
                | Expr::Binary { span, .. }
                | Expr::If { span, .. }
                | Expr::Block { span, .. }
                | Expr::Record { span, .. }
                | Expr::Raise { span, .. }
                | Expr::Handle { span, .. } => *span,
            }
        }

        pub fn int(value: i64) -> Self {
            Expr::Lit(Lit::Int(value), Span::default())
        }

        pub fn float(value: f64) -> Self {
            Expr::Lit(Lit::Float(value), Span::default())
        }

        pub fn string(text: &str) -> Self {
            Expr::Lit(Lit::Str(text.to_string()), Span::default())
        }

        pub fn bool(value: bool) -> Self {
            Expr::Lit(Lit::Bool(value), Span::default())
        }

        pub fn var(name: &str) -> Self {
            Expr::Var(Ident::new(name))
        }

        pub fn call(target: Expr, args: Vec<Expr>) -> Self {
            Expr::Apply {
                target: Box::new(target),
                args,
                type_args: vec![],
                effect_args: None,
                span: Span::default(),
            }
        }

        /// Call with explicit type and/or effect arguments: `f<T>{e}(args)`.
        pub fn call_with(
            target: Expr,
            type_args: Vec<TypeExpr>,
            effect_args: Option<Vec<&str>>,
            args: Vec<Expr>,
        ) -> Self {
            Expr::Apply {
                target: Box::new(target),
                args,
                type_args,
                effect_args: effect_args.map(|names| names.into_iter().map(Ident::new).collect()),
                span: Span::default(),
            }
        }

        pub fn binary(lhs: Expr, op: BinOp, rhs: Expr) -> Self {
            Expr::Binary {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
                span: Span::default(),
            }
        }

        pub fn attr(target: Expr, name: &str) -> Self {
            Expr::Attribute {
                target: Box::new(target),
                name: Ident::new(name),
                span: Span::default(),
            }
        }

        pub fn if_(cond: Expr, yes: Expr, no: Option<Expr>) -> Self {
            Expr::If {
                cond: Box::new(cond),
                yes: Box::new(yes),
                no: no.map(Box::new),
                span: Span::default(),
            }
        }

        pub fn block(stmts: Vec<Stmt>) -> Self {
            Expr::Block {
                stmts,
                span: Span::default(),
            }
        }

        pub fn lambda(lambda: LambdaExpr) -> Self {
            Expr::Lambda(Box::new(lambda))
        }

        /// Zero-argument lambda with inferred effects: `() => body`.
        pub fn thunk(body: Expr) -> Self {
            Expr::Lambda(Box::new(LambdaExpr::new(vec![], body)))
        }

        pub fn record(name: &str, rows: Vec<RecordRow>) -> Self {
            Expr::Record {
                name: Ident::new(name),
                rows,
                span: Span::default(),
            }
        }

        pub fn raise(effect: &str, constr: &str, args: Vec<Expr>) -> Self {
            Expr::Raise {
                effect: Ident::new(effect),
                constr: Ident::new(constr),
                args,
                span: Span::default(),
            }
        }

        pub fn handle(target: Expr, cases: Vec<HandleCase>, pure: PureCase) -> Self {
            Expr::Handle {
                target: Box::new(target),
                cases,
                pure: Box::new(pure),
                span: Span::default(),
            }
        }
    }

    impl Ident {
        pub fn new(text: &str) -> Self {
            Ident {
                text: text.to_string(),
                span: Span::default(),
            }
        }
    }

    impl TypeExpr {
        pub fn named(name: &str) -> Self {
            TypeExpr::Named(Ident::new(name))
        }

        pub fn lambda(args: Vec<TypeExpr>, effects: Vec<&str>, ret: TypeExpr) -> Self {
            TypeExpr::Lambda {
                type_vars: vec![],
                effect_vars: vec![],
                args,
                effects: effects.into_iter().map(Ident::new).collect(),
                ret: Box::new(ret),
                span: Span::default(),
            }
        }

        /// Like [`TypeExpr::lambda`] but binding effect variables: `{e}(args) ={..}> ret`.
        pub fn poly_lambda(
            effect_vars: Vec<&str>,
            args: Vec<TypeExpr>,
            effects: Vec<&str>,
            ret: TypeExpr,
        ) -> Self {
            TypeExpr::Lambda {
                type_vars: vec![],
                effect_vars: effect_vars.into_iter().map(Ident::new).collect(),
                args,
                effects: effects.into_iter().map(Ident::new).collect(),
                ret: Box::new(ret),
                span: Span::default(),
            }
        }

        pub fn span(&self) -> Span {
            match self {
                TypeExpr::Named(ident) => ident.span,
                TypeExpr::Lambda { span, .. } => *span,
            }
        }
    }

    impl TypeVar {
        pub fn new(name: &str, subtypes: Vec<&str>) -> Self {
            TypeVar {
                name: Ident::new(name),
                subtypes: subtypes.into_iter().map(Ident::new).collect(),
            }
        }
    }

    impl Param {
        pub fn new(name: &str, ty: TypeExpr) -> Self {
            Param {
                name: Ident::new(name),
                ty,
            }
        }
    }

    impl LambdaExpr {
        pub fn new(args: Vec<Param>, body: Expr) -> Self {
            LambdaExpr {
                type_vars: vec![],
                effect_vars: vec![],
                effects: None,
                args,
                ret: None,
                body,
                span: Span::default(),
            }
        }

        pub fn with_ret(mut self, ret: TypeExpr) -> Self {
            self.ret = Some(ret);
            self
        }

        pub fn with_effects(mut self, effects: Vec<&str>) -> Self {
            self.effects = Some(effects.into_iter().map(Ident::new).collect());
            self
        }

        pub fn with_type_vars(mut self, type_vars: Vec<TypeVar>) -> Self {
            self.type_vars = type_vars;
            self
        }

        pub fn with_effect_vars(mut self, effect_vars: Vec<&str>) -> Self {
            self.effect_vars = effect_vars.into_iter().map(Ident::new).collect();
            self
        }
    }

    impl Stmt {
        pub fn let_(name: &str, value: Expr) -> Self {
            Stmt::Let {
                name: Ident::new(name),
                ann: None,
                value,
                span: Span::default(),
            }
        }

        pub fn let_typed(name: &str, ann: TypeExpr, value: Expr) -> Self {
            Stmt::Let {
                name: Ident::new(name),
                ann: Some(ann),
                value,
                span: Span::default(),
            }
        }

        pub fn expr(expr: Expr) -> Self {
            Stmt::Expr(expr)
        }
    }

    impl RecordRow {
        pub fn field(name: &str, value: Expr) -> Self {
            RecordRow::Field {
                name: Ident::new(name),
                value,
            }
        }
    }

    impl HandleCase {
        pub fn new(effect: &str, constr: &str, args: Vec<&str>, k: &str, body: Expr) -> Self {
            HandleCase {
                effect: Ident::new(effect),
                constr: Ident::new(constr),
                args: args.into_iter().map(Ident::new).collect(),
                k: Ident::new(k),
                body,
                span: Span::default(),
            }
        }
    }

    impl PureCase {
        pub fn new(arg: &str, body: Expr) -> Self {
            PureCase {
                arg: Ident::new(arg),
                body,
            }
        }
    }

    impl Define {
        pub fn new(name: &str, ann: Option<TypeExpr>, value: Expr) -> Self {
            Define {
                name: Ident::new(name),
                ann,
                value,
                span: Span::default(),
            }
        }
    }

    impl EffectDecl {
        /// `constrs` is `(name, args, ret)` per constructor.
        pub fn new(name: &str, constrs: Vec<(&str, Vec<TypeExpr>, TypeExpr)>) -> Self {
            EffectDecl {
                name: Ident::new(name),
                constrs: constrs
                    .into_iter()
                    .map(|(cname, args, ret)| EffectConstr {
                        name: Ident::new(cname),
                        args,
                        ret,
                        span: Span::default(),
                    })
                    .collect(),
                span: Span::default(),
            }
        }
    }

    impl RecordDecl {
        pub fn new(name: &str, items: Vec<RecordItem>) -> Self {
            RecordDecl {
                name: Ident::new(name),
                items,
                span: Span::default(),
            }
        }
    }

    impl RecordItem {
        pub fn row(name: &str, ty: TypeExpr) -> Self {
            RecordItem::Row {
                name: Ident::new(name),
                ty,
            }
        }

        pub fn spread(name: &str) -> Self {
            RecordItem::Spread(Ident::new(name))
        }
    }

    impl Module {
        pub fn new(items: Vec<Toplevel>) -> Self {
            Module {
                items,
                span: Span::default(),
            }
        }
    }
}

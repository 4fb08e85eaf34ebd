//! The expression language: variable interpolation plus embedded arithmetic
//! with formatting, compiled once and evaluated at hot-path speed.
//!
//! External surface:
//!
//! ```text
//! "literal text"
//! "{ctx.key}"            ctx ∈ {self, other, global} | else resource
//! "$(arith)"             unformatted double
//! "$i(arith)"            integer (fraction dropped)
//! "$f(arith)"            double
//! "$05.3f(arith)"        zero-pad width 5, precision 3, double
//! ```

pub mod ast;
pub mod expression;
pub mod format;
pub mod pool;
pub mod virtual_double;

pub use expression::{ExprContext, Expression, MAX_RECURSION_DEPTH, eval_as_bool};
pub use pool::PooledExpr;
pub use virtual_double::VirtualDouble;

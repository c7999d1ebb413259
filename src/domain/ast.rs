//! Expression AST data structures.
//!
//! Operators are represented as calls with canonical uppercase tags (ADD,
//! PRODUCT, ...) so the compiler resolves them through the same registry as
//! named functions, and serialization round-trips to an identical tree.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Decoded string content (escapes already resolved).
    Text(String),
    /// Field token, optionally dotted `interval.name`; split at compile time.
    Field(String),
    Call(String, Vec<Expr>),
    /// Output renaming, only legal at the top level of an expression list.
    As(Box<Expr>, String),
}

impl Expr {
    /// Canonical normal form: stable under reparsing, used as the key for
    /// memoized fields and warm-up maps.
    pub fn serialize(&self) -> String {
        self.to_string()
    }

    /// Serialized form with the given interval prefix stripped off every
    /// field reference, the way a single-interval catalog stores it.
    pub fn serialize_unqualified(&self, interval: &str) -> String {
        self.strip_interval(interval).serialize()
    }

    fn strip_interval(&self, interval: &str) -> Expr {
        match self {
            Expr::Field(token) => {
                let prefix = format!("{interval}.");
                match token.strip_prefix(&prefix) {
                    Some(name) => Expr::Field(name.to_string()),
                    None => self.clone(),
                }
            }
            Expr::Call(name, args) => Expr::Call(
                name.clone(),
                args.iter().map(|a| a.strip_interval(interval)).collect(),
            ),
            Expr::As(inner, name) => {
                Expr::As(Box::new(inner.strip_interval(interval)), name.clone())
            }
            _ => self.clone(),
        }
    }

    /// Every node of the tree in post-order, the whole expression last.
    pub fn walk<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match self {
            Expr::Call(_, args) => {
                for arg in args {
                    arg.walk(out);
                }
            }
            Expr::As(inner, _) => inner.walk(out),
            _ => {}
        }
        out.push(self);
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Text(s) => write!(f, "{}", serde_json::Value::String(s.clone())),
            Expr::Field(token) => write!(f, "{}", token),
            Expr::Call(name, args) => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::As(inner, name) => {
                write!(
                    f,
                    "{} AS {}",
                    inner,
                    serde_json::Value::String(name.clone())
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_call() {
        let expr = Expr::Call(
            "SMA".to_string(),
            vec![Expr::Number(20.0), Expr::Field("day.close".to_string())],
        );
        assert_eq!(expr.serialize(), "SMA(20,day.close)");
    }

    #[test]
    fn serialize_trims_whole_numbers() {
        assert_eq!(Expr::Number(2.0).serialize(), "2");
        assert_eq!(Expr::Number(-4.2).serialize(), "-4.2");
    }

    #[test]
    fn serialize_text_is_json_encoded() {
        assert_eq!(Expr::Text("a\"b".to_string()).serialize(), r#""a\"b""#);
    }

    #[test]
    fn unqualified_strips_single_interval_prefix() {
        let expr = Expr::Call(
            "SMA".to_string(),
            vec![Expr::Number(20.0), Expr::Field("day.close".to_string())],
        );
        assert_eq!(expr.serialize_unqualified("day"), "SMA(20,close)");
        assert_eq!(expr.serialize_unqualified("week"), "SMA(20,day.close)");
    }

    #[test]
    fn walk_is_post_order_with_root_last() {
        let expr = Expr::Call(
            "ADD".to_string(),
            vec![Expr::Number(1.0), Expr::Field("close".to_string())],
        );
        let mut nodes = Vec::new();
        expr.walk(&mut nodes);
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0], &Expr::Number(1.0));
        assert_eq!(nodes[2], &expr);
    }
}

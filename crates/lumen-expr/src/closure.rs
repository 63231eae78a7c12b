#![forbid(unsafe_code)]

//! Call expressions over evaluated parameters.
//!
//! A closure expression owns an ordered list of parameter expressions and a
//! [`Callable`]. Evaluation evaluates every parameter first (children
//! before parent) and fails fast: a failing parameter short-circuits the
//! call, and values evaluated so far are released on the way out. The
//! callable receives `this` as argument 0 and the parameters as 1..N.

use std::sync::Arc;

use lumen_object::{Callable, Object, Value, ValueType};

use crate::expression::{Expression, Node, NotifyFn, SubWatch};

pub(crate) struct ClosureNode {
    callable: Callable,
    params: Vec<Expression>,
}

impl Node for ClosureNode {
    fn type_name(&self) -> &'static str {
        "closure"
    }

    fn value_type(&self) -> ValueType {
        self.callable.return_type().clone()
    }

    fn is_static(&self) -> bool {
        self.params.iter().all(Expression::is_static)
    }

    fn evaluate(&self, this: Option<&Object>) -> Option<Value> {
        let mut args = Vec::with_capacity(self.params.len());
        for param in &self.params {
            // Early return drops `args`, releasing what was evaluated.
            args.push(param.evaluate(this)?);
        }

        let value = self.callable.invoke(this, &args);
        if !self.callable.return_type().accepts(&value) {
            tracing::error!(
                expected = %self.callable.return_type(),
                "callable returned a value of the wrong type"
            );
            return None;
        }
        Some(value)
    }

    fn watch_slots(&self) -> usize {
        1 + self
            .params
            .iter()
            .filter(|p| !p.is_static())
            .map(Expression::watch_slots)
            .sum::<usize>()
    }

    fn watch(self: Arc<Self>, this: Option<&Object>, notify: &NotifyFn) -> SubWatch {
        // Parameters are visited in declared order; static ones need no
        // subscription. The relay for each is the caller's notify itself.
        let children = self
            .params
            .iter()
            .filter(|p| !p.is_static())
            .map(|p| p.subwatch(this, notify))
            .collect();
        SubWatch::Closure(ClosureSub { children })
    }
}

/// Observer state of one closure watch: the non-static parameters'
/// sub-watches, in parameter order.
pub(crate) struct ClosureSub {
    children: Vec<SubWatch>,
}

impl ClosureSub {
    pub(crate) fn child_slot_count(&self) -> usize {
        self.children.iter().map(SubWatch::slot_count).sum()
    }
}

impl Expression {
    /// An expression that calls `callable` with the evaluated `params`.
    ///
    /// The expression's value type is the callable's declared return type.
    #[must_use]
    pub fn closure(callable: Callable, params: Vec<Expression>) -> Expression {
        Expression::from_node(Arc::new(ClosureNode { callable, params }))
    }

    /// Convenience for [`Expression::closure`] that wraps a plain function.
    #[must_use]
    pub fn closure_fn(
        return_type: ValueType,
        func: impl Fn(Option<&Object>, &[Value]) -> Value + 'static,
        params: Vec<Expression>,
    ) -> Expression {
        Expression::closure(Callable::new(return_type, func), params)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use lumen_object::{ObjectType, ParamFlags, ParamSpec};

    fn item_type() -> ObjectType {
        ObjectType::builder("Item")
            .property(ParamSpec::new("x", ValueType::Int, ParamFlags::READWRITE))
            .build()
    }

    fn sum_callable() -> Callable {
        Callable::new(ValueType::Int, |_, args| {
            Value::Int(args.iter().filter_map(Value::as_int).sum())
        })
    }

    #[test]
    fn calls_with_evaluated_parameters() {
        let expr = Expression::closure(
            sum_callable(),
            vec![Expression::constant(2), Expression::constant(40)],
        );
        assert_eq!(expr.value_type(), ValueType::Int);
        assert_eq!(expr.evaluate(None), Some(Value::Int(42)));
    }

    #[test]
    fn receives_this_as_argument_zero() {
        let item = item_type();
        let obj = Object::new(&item);
        obj.set("x", 5).unwrap();

        let expr = Expression::closure_fn(
            ValueType::Int,
            |this, _| {
                let x = this.unwrap().get("x").unwrap();
                Value::Int(x.as_int().unwrap() * 2)
            },
            vec![],
        );
        assert_eq!(expr.evaluate(Some(&obj)), Some(Value::Int(10)));
    }

    #[test]
    fn static_iff_all_parameters_are_static() {
        let item = item_type();
        let obj = Object::new(&item);

        let all_const = Expression::closure(
            sum_callable(),
            vec![Expression::constant(1), Expression::constant(2)],
        );
        assert!(all_const.is_static());

        let mixed = Expression::closure(
            sum_callable(),
            vec![
                Expression::constant(1),
                Expression::property(&item, Some(Expression::object(&obj)), "x").unwrap(),
            ],
        );
        assert!(!mixed.is_static());
    }

    #[test]
    fn fails_fast_without_invoking_the_callable() {
        let item = item_type();
        let obj = Object::new(&item);
        let invoked = Rc::new(Cell::new(false));

        let invoked_clone = Rc::clone(&invoked);
        let expr = Expression::closure_fn(
            ValueType::Int,
            move |_, _| {
                invoked_clone.set(true);
                Value::Int(0)
            },
            vec![
                Expression::constant(1),
                Expression::object(&obj),
                Expression::constant(2),
            ],
        );

        drop(obj);
        assert_eq!(expr.evaluate(None), None);
        assert!(!invoked.get());
    }

    #[test]
    fn failed_evaluation_releases_earlier_parameters() {
        let item = item_type();
        let kept = Object::new(&item);
        let doomed = Object::new(&item);

        let expr = Expression::closure(
            Callable::new(ValueType::Int, |_, _| Value::Int(0)),
            vec![
                Expression::constant(&kept),
                Expression::object(&doomed),
            ],
        );

        let before = kept.ref_count();
        drop(doomed);
        assert_eq!(expr.evaluate(None), None);
        // The evaluated copy of `kept` from parameter 0 was dropped again.
        assert_eq!(kept.ref_count(), before);
    }

    #[test]
    fn wrong_return_type_fails_evaluation() {
        let expr = Expression::closure_fn(
            ValueType::Int,
            |_, _| Value::Str("not an int".into()),
            vec![],
        );
        assert_eq!(expr.evaluate(None), None);
    }

    #[test]
    fn slots_skip_static_parameters() {
        let item = item_type();
        let a = Object::new(&item);
        let b = Object::new(&item);

        let expr = Expression::closure(
            sum_callable(),
            vec![
                Expression::constant(1),
                Expression::property(&item, Some(Expression::object(&a)), "x").unwrap(),
                Expression::property(&item, Some(Expression::object(&b)), "x").unwrap(),
            ],
        );
        // One slot for the closure itself, two for each property chain
        // (property + object reference).
        assert_eq!(expr.watch_slots(), 5);

        let notify: NotifyFn = Rc::new(|| {});
        let sub = expr.subwatch(None, &notify);
        assert_eq!(sub.slot_count(), 5);
    }

    #[test]
    fn watch_forwards_parameter_changes() {
        let item = item_type();
        let obj = Object::new(&item);
        let count = Rc::new(Cell::new(0u32));

        let expr = Expression::closure(
            sum_callable(),
            vec![Expression::property(&item, None, "x").unwrap()],
        );

        let count_clone = Rc::clone(&count);
        let notify: NotifyFn = Rc::new(move || count_clone.set(count_clone.get() + 1));
        let sub = expr.subwatch(Some(&obj), &notify);

        obj.set("x", 1).unwrap();
        assert_eq!(count.get(), 1);

        drop(sub);
        obj.set("x", 2).unwrap();
        assert_eq!(count.get(), 1);
        assert_eq!(obj.notify_handler_count(), 0);
    }
}

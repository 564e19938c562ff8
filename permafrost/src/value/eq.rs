use {
    super::{Val, Value},
    std::collections::HashSet,
};

/// Comparing values.
impl Value
{
    /// Whether two values have the same structure.
    ///
    /// Two values are structurally equal if they are of the same kind,
    /// carry the same kind-specific data, and their children are
    /// structurally equal in turn. Cycles are handled: a pair that is
    /// already being compared is assumed to be equal.
    ///
    /// Settled cells compare by their contents and mutable references
    /// by their current contents. Unforced thunks and pending tasks and
    /// promises are only equal to themselves.
    pub fn structurally_eq(&self, other: &Value) -> bool
    {
        let mut visited = HashSet::new();
        let mut todo = vec![(self.clone(), other.clone())];

        // Snapshots of cell contents are kept here, so that
        // their addresses are not reused while in the visited set.
        let mut retained = Vec::new();

        while let Some((a, b)) = todo.pop() {
            if a.ptr_eq(&b) || !visited.insert((a.as_raw(), b.as_raw())) {
                retained.push((a, b));
                continue;
            }

            let equal = match (a.borrow(), b.borrow()) {
                (Val::Scalar(a), Val::Scalar(b)) => a == b,

                (Val::Constructor{tag: at, fields: af, scalars: asc},
                 Val::Constructor{tag: bt, fields: bf, scalars: bsc}) => {
                    let equal = at == bt && asc == bsc && af.len() == bf.len();
                    if equal {
                        todo.extend(af.iter().cloned().zip(bf.iter().cloned()));
                    }
                    equal
                },

                (Val::Array(ae), Val::Array(be)) => {
                    let equal = ae.len() == be.len();
                    if equal {
                        todo.extend(ae.iter().cloned().zip(be.iter().cloned()));
                    }
                    equal
                },

                (Val::ByteArray{elem_size: asz, bytes: ab},
                 Val::ByteArray{elem_size: bsz, bytes: bb}) =>
                    asz == bsz && ab == bb,

                (Val::String(ab), Val::String(bb)) => ab == bb,

                (Val::Thunk(Some(av)),   Val::Thunk(Some(bv)))   |
                (Val::Task(Some(av)),    Val::Task(Some(bv)))    |
                (Val::Promise(Some(av)), Val::Promise(Some(bv))) |
                (Val::MutableRef(av),    Val::MutableRef(bv))    => {
                    todo.push((av, bv));
                    true
                },

                (Val::BigInteger(ai), Val::BigInteger(bi)) => ai == bi,

                _ => false,
            };

            if !equal {
                return false;
            }

            retained.push((a, b));
        }

        true
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn list(items: &[u8]) -> Value
    {
        let mut list = Value::constructor(0, vec![], &[]).unwrap();
        for &item in items.iter().rev() {
            let fields = vec![Value::scalar_from_u8(item), list];
            list = Value::constructor(1, fields, &[]).unwrap();
        }
        list
    }

    #[test]
    fn lists()
    {
        assert!(list(b"abc").structurally_eq(&list(b"abc")));
        assert!(!list(b"abc").structurally_eq(&list(b"abd")));
        assert!(!list(b"abc").structurally_eq(&list(b"ab")));
    }

    #[test]
    fn cycles()
    {
        let knot = || {
            let node = Value::constructor(3, vec![Value::scalar_from_u8(0)], b"x")
                .unwrap();
            unsafe { node.constructor_set_field(0, node.clone()); }
            node
        };
        let (a, b) = (knot(), knot());
        assert!(a.structurally_eq(&b));
        unsafe {
            a.constructor_set_field(0, Value::scalar_from_u8(0));
            b.constructor_set_field(0, Value::scalar_from_u8(0));
        }
    }

    #[test]
    fn cells()
    {
        let pending = Value::promise();
        assert!(pending.structurally_eq(&pending));
        assert!(!pending.structurally_eq(&Value::promise()));

        let forced = |v| Value::thunk_forced(Value::scalar_from_u8(v));
        assert!(forced(1).structurally_eq(&forced(1)));
        assert!(!forced(1).structurally_eq(&forced(2)));
        assert!(!forced(1).structurally_eq(&Value::task_resolved(Value::scalar_from_u8(1))));
    }
}

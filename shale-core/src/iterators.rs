//! The iteration protocol.
//!
//! `for x in v` computes an iterator from `v`, then drives it with
//! `has_next`/`next` pairs. Container iterators hold the live container and
//! an index, so concurrent mutation is visible mid-loop (matching the
//! container-sharing rules of the object model).

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{incompatible_type, Error};
use crate::values::Value;

/// A bounded arithmetic progression, produced by `range()` and `lo..hi`.
#[derive(Clone, Debug)]
pub struct RangeIter {
    /// First value yielded.
    pub start: i64,
    /// Exclusive stop bound.
    pub stop: i64,
    /// Step; never zero.
    pub step: i64,
    /// Next value to yield.
    pub cur: i64,
}

impl RangeIter {
    /// Returns a new range.
    pub const fn new(start: i64, stop: i64, step: i64) -> Self {
        Self {
            start,
            stop,
            step,
            cur: start,
        }
    }

    /// Whether another value remains.
    pub const fn has_next(&self) -> bool {
        if self.step > 0 {
            self.cur < self.stop
        } else {
            self.cur > self.stop
        }
    }

    /// Yields the next value and advances.
    pub fn next_value(&mut self) -> i64 {
        let v = self.cur;
        self.cur += self.step;
        v
    }

    /// Number of values not yet yielded.
    pub const fn remaining(&self) -> i64 {
        let span = if self.step > 0 {
            self.stop - self.cur
        } else {
            self.cur - self.stop
        };
        if span <= 0 {
            0
        } else {
            let step = self.step.abs();
            (span + step - 1) / step
        }
    }
}

/// An iterator over a container value.
#[derive(Debug)]
pub enum ValueIter {
    Array {
        items: Rc<RefCell<Vec<Value>>>,
        index: usize,
    },
    Tuple {
        items: Rc<[Value]>,
        index: usize,
    },
    Str {
        chars: Vec<char>,
        index: usize,
    },
    /// Yields map keys in insertion order.
    MapKeys {
        keys: Vec<Value>,
        index: usize,
    },
    SetItems {
        items: Vec<Value>,
        index: usize,
    },
    /// Yields the lines of a captured command's output.
    Lines {
        lines: Vec<String>,
        index: usize,
    },
}

impl ValueIter {
    fn has_next(&self) -> bool {
        match self {
            Self::Array { items, index } => *index < items.borrow().len(),
            Self::Tuple { items, index } => *index < items.len(),
            Self::Str { chars, index } => *index < chars.len(),
            Self::MapKeys { keys, index } => *index < keys.len(),
            Self::SetItems { items, index } => *index < items.len(),
            Self::Lines { lines, index } => *index < lines.len(),
        }
    }

    fn next_value(&mut self) -> Result<Value, Error> {
        let exhausted = || Error::new(crate::error::ErrorKind::InvalidArgs, "iterator exhausted");

        match self {
            Self::Array { items, index } => {
                let items = items.borrow();
                let v = items.get(*index).cloned().ok_or_else(exhausted)?;
                *index += 1;
                Ok(v)
            }
            Self::Tuple { items, index } => {
                let v = items.get(*index).cloned().ok_or_else(exhausted)?;
                *index += 1;
                Ok(v)
            }
            Self::Str { chars, index } => {
                let c = chars.get(*index).copied().ok_or_else(exhausted)?;
                *index += 1;
                Ok(Value::str(c.to_string()))
            }
            Self::MapKeys { keys, index } => {
                let v = keys.get(*index).cloned().ok_or_else(exhausted)?;
                *index += 1;
                Ok(v)
            }
            Self::SetItems { items, index } => {
                let v = items.get(*index).cloned().ok_or_else(exhausted)?;
                *index += 1;
                Ok(v)
            }
            Self::Lines { lines, index } => {
                let v = lines.get(*index).cloned().ok_or_else(exhausted)?;
                *index += 1;
                Ok(Value::str(v))
            }
        }
    }
}

/// Computes an iterator value for `value` (the `ObjIter` operation).
pub fn obj_iter(value: &Value) -> Result<Value, Error> {
    let iter = match value {
        Value::Array(items) => ValueIter::Array {
            items: Rc::clone(items),
            index: 0,
        },
        Value::Tuple(items) => ValueIter::Tuple {
            items: Rc::clone(items),
            index: 0,
        },
        Value::Str(s) => ValueIter::Str {
            chars: s.chars().collect(),
            index: 0,
        },
        Value::Map(map) => ValueIter::MapKeys {
            keys: map.borrow().values().map(|e| e.key.clone()).collect(),
            index: 0,
        },
        Value::Set(set) => ValueIter::SetItems {
            items: set.borrow().values().cloned().collect(),
            index: 0,
        },
        Value::Range(range) => {
            // Ranges iterate themselves; restart from a fresh clone so a
            // second loop sees the full sequence.
            let r = range.borrow();
            return Ok(Value::Range(Rc::new(RefCell::new(RangeIter::new(
                r.cur, r.stop, r.step,
            )))));
        }
        Value::Iter(_) => return Ok(value.clone()),
        Value::CmdResult(result) => ValueIter::Lines {
            lines: result.out.lines().map(ToString::to_string).collect(),
            index: 0,
        },
        _ => return Err(incompatible_type("iterate", value.type_name())),
    };

    Ok(Value::Iter(Rc::new(RefCell::new(iter))))
}

/// The `HasNext` operation; always returns a bool value.
pub fn has_next(iterator: &Value) -> Result<Value, Error> {
    match iterator {
        Value::Range(r) => Ok(Value::Bool(r.borrow().has_next())),
        Value::Iter(i) => Ok(Value::Bool(i.borrow().has_next())),
        _ => Err(incompatible_type("has_next", iterator.type_name())),
    }
}

/// The `Next` operation.
pub fn next(iterator: &Value) -> Result<Value, Error> {
    match iterator {
        Value::Range(r) => Ok(Value::Int(r.borrow_mut().next_value())),
        Value::Iter(i) => i.borrow_mut().next_value(),
        _ => Err(incompatible_type("next", iterator.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn drain(value: &Value) -> Vec<Value> {
        let iter = obj_iter(value).unwrap();
        let mut out = vec![];
        while matches!(has_next(&iter).unwrap(), Value::Bool(true)) {
            out.push(next(&iter).unwrap());
        }
        out
    }

    #[test]
    fn range_yields_len_items() {
        let range = Value::Range(Rc::new(RefCell::new(RangeIter::new(0, 3, 1))));
        assert_eq!(range.len().unwrap(), 3);
        let items = drain(&range);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].format(), "0");
        assert_eq!(items[2].format(), "2");
    }

    #[test]
    fn array_iteration_count_matches_len() {
        let arr = Value::array((0..5).map(Value::Int).collect());
        assert_eq!(drain(&arr).len() as i64, arr.len().unwrap());
    }

    #[test]
    fn string_iterates_characters() {
        let s = Value::str("abc");
        let items = drain(&s);
        assert_eq!(items.len(), 3);
        assert_eq!(items[1].format(), "b");
    }

    #[test]
    fn map_iterates_keys_in_insertion_order() {
        let map = Value::Map(Rc::new(RefCell::new(indexmap::IndexMap::new())));
        map.set_item(&Value::str("b"), Value::Int(1)).unwrap();
        map.set_item(&Value::str("a"), Value::Int(2)).unwrap();
        let keys = drain(&map);
        assert_eq!(keys[0].format(), "b");
        assert_eq!(keys[1].format(), "a");
    }

    #[test]
    fn non_iterable_raises() {
        assert!(obj_iter(&Value::Int(1)).is_err());
    }

    #[test]
    fn descending_range() {
        let range = Value::Range(Rc::new(RefCell::new(RangeIter::new(3, 0, -1))));
        let items = drain(&range);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].format(), "3");
    }
}

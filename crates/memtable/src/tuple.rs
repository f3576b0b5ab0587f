// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::fmt::{Display, Formatter};

/// A single component of an index tuple.
///
/// Datums of different kinds order by kind first (in declaration order), then by value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<bool> for Datum {
    fn from(value: bool) -> Self {
        Datum::Bool(value)
    }
}

impl From<i64> for Datum {
    fn from(value: i64) -> Self {
        Datum::Int(value)
    }
}

impl From<u64> for Datum {
    fn from(value: u64) -> Self {
        Datum::UInt(value)
    }
}

impl From<&str> for Datum {
    fn from(value: &str) -> Self {
        Datum::Text(value.to_string())
    }
}

impl From<String> for Datum {
    fn from(value: String) -> Self {
        Datum::Text(value)
    }
}

impl From<Vec<u8>> for Datum {
    fn from(value: Vec<u8>) -> Self {
        Datum::Bytes(value)
    }
}

impl<T: Into<Datum>> From<Option<T>> for Datum {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Datum::Null)
    }
}

impl Display for Datum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Datum::Null => write!(f, "null"),
            Datum::Bool(b) => write!(f, "{b}"),
            Datum::Int(i) => write!(f, "{i}"),
            Datum::UInt(u) => write!(f, "{u}"),
            Datum::Text(s) => write!(f, "{s:?}"),
            Datum::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// A secondary index key. Tuples compare lexicographically, component by component, with a
/// shorter tuple ordering before any longer tuple it is a prefix of.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tuple(Vec<Datum>);

impl Tuple {
    pub fn new(datums: Vec<Datum>) -> Self {
        Self(datums)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Datum> {
        self.0.iter()
    }

    pub fn get(&self, position: usize) -> Option<&Datum> {
        self.0.get(position)
    }
}

impl<D: Into<Datum>> FromIterator<D> for Tuple {
    fn from_iter<I: IntoIterator<Item = D>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<Datum>> for Tuple {
    fn from(datums: Vec<Datum>) -> Self {
        Self(datums)
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, datum) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{datum}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_ordering() {
        let a: Tuple = [Datum::from("name"), Datum::from(1i64)].into_iter().collect();
        let b: Tuple = [Datum::from("name"), Datum::from(2i64)].into_iter().collect();
        let prefix: Tuple = ["name"].into_iter().collect();
        assert!(a < b);
        assert!(prefix < a);
        assert!(Tuple::default() < prefix);
    }

    #[test]
    fn test_mixed_kinds_order_by_kind() {
        assert!(Datum::Null < Datum::Bool(false));
        assert!(Datum::Int(i64::MAX) < Datum::UInt(0));
        assert!(Datum::UInt(u64::MAX) < Datum::Text(String::new()));
        assert!(Datum::Text("zzz".into()) < Datum::Bytes(vec![]));
    }

    #[test]
    fn test_display() {
        let t: Tuple = [Datum::from("email"), Datum::from(None::<i64>), Datum::from(7u64)]
            .into_iter()
            .collect();
        assert_eq!(t.to_string(), r#"("email", null, 7)"#);
        assert_eq!(t.len(), 3);
        assert_eq!(t.get(1), Some(&Datum::Null));
    }
}

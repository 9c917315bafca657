// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A "typed" arena-index crate.
//!
//! Every long-lived object in vecnet (buffers, nodes, interfaces,
//! adjacencies, feature configs) lives in a pool and is referred to by a
//! small integer slot number.

use core::fmt::{Debug, Formatter};
use core::marker::PhantomData;
use std::fmt::Display;

#[allow(unused_imports)] // re-export
#[cfg(any(test, feature = "bolero"))]
pub use contract::*;

/// A typed pool index.
///
/// The goal of this crate is to create compile-time associations between
/// pool slot numbers and the type of object stored in the pool.
///
/// This association helps prevent us from conflating index spaces while
/// avoiding the need to write a different `FooIndex` newtype for each pooled
/// type.
///
/// # Example
///
/// ```
/// # use vecnet_id::Idx;
/// pub struct HwInterface {
///     sw: Idx<SwInterface>,
/// }
///
/// pub struct SwInterface {
///     sup: Idx<SwInterface>,
///     hw: Idx<HwInterface>,
/// }
/// ```
///
/// Assigning an `Idx<HwInterface>` to a field expecting an
/// `Idx<SwInterface>` does not compile, and that's the point: the annotation
/// consumes no space, and the wrapped `u32` is exactly as cheap to copy and
/// compare as a bare one.
pub type Idx<T> = AbstractIdx<fn() -> T, u32>;

/// An abstract, typed index.
///
/// <div class="warning">
///
/// Unless you need something besides `u32` slots, use the [Idx] type alias
/// instead.
///
/// The `fn() -> T` tag keeps the phantom parameter covariant and
/// `Send + Sync` without imposing either bound on `T` itself.
///
/// </div>
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AbstractIdx<T, U = u32>(U, PhantomData<T>);

impl<T> Display for Idx<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_invalid() {
            write!(f, "~0")
        } else {
            <_ as Display>::fmt(&self.0, f)
        }
    }
}

impl<T> Debug for Idx<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        <_ as Display>::fmt(self, f)
    }
}

impl<T> Default for Idx<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<T> Idx<T> {
    /// The sentinel "no such slot" index, printed as `~0`.
    pub const INVALID: Idx<T> = AbstractIdx(u32::MAX, PhantomData);

    /// Wrap a raw slot number.
    #[inline(always)]
    #[must_use]
    pub const fn new(raw: u32) -> Idx<T> {
        AbstractIdx(raw, PhantomData)
    }

    /// Strip type safety and return the wrapped slot number.
    #[must_use]
    pub const fn into_raw(self) -> u32 {
        self.0
    }

    /// Return the slot number as a `usize`, suitable for direct indexing.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// True iff this is the [`Idx::INVALID`] sentinel.
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 == u32::MAX
    }

    /// The index `offset` slots past this one.
    ///
    /// Contiguous pool blocks (multipath adjacency groups, buffer runs) are
    /// addressed as a base index plus a slot offset.
    #[must_use]
    pub const fn add(self, offset: u32) -> Idx<T> {
        AbstractIdx(self.0 + offset, PhantomData)
    }
}

impl<T> From<Idx<T>> for u32 {
    fn from(value: Idx<T>) -> Self {
        value.0
    }
}

impl<T> From<u32> for Idx<T> {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use crate::{AbstractIdx, Idx};
    use bolero::{Driver, TypeGenerator};
    use core::marker::PhantomData;

    impl<T: 'static> TypeGenerator for Idx<T> {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(AbstractIdx(driver.produce::<u32>()?, PhantomData))
        }
    }
}

#[cfg(test)]
mod test {
    use crate::Idx;

    fn parse_back_test<T: 'static>() {
        bolero::check!()
            .with_type()
            .for_each(|x: &Idx<T>| assert_eq!(*x, Idx::from(x.into_raw())));
    }

    #[test]
    fn parse_back_unit() {
        parse_back_test::<()>()
    }

    #[test]
    fn parse_back_string() {
        parse_back_test::<String>()
    }

    #[test]
    fn parse_back_recursive() {
        parse_back_test::<Idx<String>>()
    }

    #[test]
    fn invalid_is_invalid() {
        assert!(Idx::<()>::INVALID.is_invalid());
        assert!(!Idx::<()>::new(0).is_invalid());
        assert_eq!(format!("{}", Idx::<()>::INVALID), "~0");
    }

    #[test]
    fn block_offsets() {
        let base = Idx::<()>::new(16);
        assert_eq!(base.add(0), base);
        assert_eq!(base.add(3).into_raw(), 19);
    }
}

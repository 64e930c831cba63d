use super::value::{FromValue, IntoValue, Value};
use super::vm::VmContext;
use crate::errors::RuntimeError;
use thin_vec::ThinVec;

/// A counted group of values: the arguments of a native function call, or
/// the results of a call made through the embedding API.
///
/// Stored back-to-front so that [MultiValue::pop_front] is cheap.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MultiValue {
    pub(crate) values: ThinVec<Value>,
}

impl MultiValue {
    pub fn pack<T: IntoMulti>(value: T, ctx: &mut VmContext) -> Result<MultiValue, RuntimeError> {
        T::into_multi(value, ctx)
    }

    pub fn unpack<T: FromMulti>(self, ctx: &mut VmContext) -> Result<T, RuntimeError> {
        T::from_multi(self, ctx)
    }

    /// Like [MultiValue::unpack], but errors are tagged with the argument
    /// position, for native functions validating their inputs.
    pub fn unpack_args<T: FromArgs>(self, ctx: &mut VmContext) -> Result<T, RuntimeError> {
        T::from_args(self, 1, ctx)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        if index < self.values.len() {
            self.values.get(self.values.len() - index - 1)
        } else {
            None
        }
    }

    #[inline]
    pub fn push_front(&mut self, value: Value) {
        self.values.push(value);
    }

    #[inline]
    pub fn pop_front(&mut self) -> Option<Value> {
        self.values.pop()
    }

    #[inline]
    pub fn push_back(&mut self, value: Value) {
        self.values.insert(0, value);
    }

    #[inline]
    pub fn clear(&mut self) {
        self.values.clear();
    }

    #[inline]
    pub fn to_vec(mut self) -> Vec<Value> {
        self.values.reverse();
        self.values.to_vec()
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().rev()
    }

    pub(crate) fn from_values(values: impl DoubleEndedIterator<Item = Value>) -> Self {
        Self {
            values: values.rev().collect(),
        }
    }
}

pub trait IntoMulti {
    fn into_multi(self, ctx: &mut VmContext) -> Result<MultiValue, RuntimeError>;
}

impl IntoMulti for MultiValue {
    #[inline]
    fn into_multi(self, _: &mut VmContext) -> Result<MultiValue, RuntimeError> {
        Ok(self)
    }
}

impl IntoMulti for () {
    #[inline]
    fn into_multi(self, _: &mut VmContext) -> Result<MultiValue, RuntimeError> {
        Ok(MultiValue::default())
    }
}

impl<T: IntoValue> IntoMulti for T {
    #[inline]
    fn into_multi(self, ctx: &mut VmContext) -> Result<MultiValue, RuntimeError> {
        let mut multi = MultiValue::default();
        multi.push_front(self.into_value(ctx)?);
        Ok(multi)
    }
}

macro_rules! impl_into_multi {
    ($($name:ident)+) => (
        impl<$($name: IntoValue),*> IntoMulti for ($($name,)*) {
            #[allow(non_snake_case)]
            #[inline]
            fn into_multi(self, ctx: &mut VmContext) -> Result<MultiValue, RuntimeError> {
                let mut multi = MultiValue::default();
                let ($($name,)*) = self;
                $(multi.values.push($name.into_value(ctx)?);)*
                multi.values.reverse();
                Ok(multi)
            }
        }
    );
}

impl_into_multi! { A }
impl_into_multi! { A B }
impl_into_multi! { A B C }
impl_into_multi! { A B C D }
impl_into_multi! { A B C D E }
impl_into_multi! { A B C D E F }
impl_into_multi! { A B C D E F G }
impl_into_multi! { A B C D E F G H }

pub trait FromMulti: Sized {
    fn from_multi(multi: MultiValue, ctx: &mut VmContext) -> Result<Self, RuntimeError>;
}

impl FromMulti for MultiValue {
    #[inline]
    fn from_multi(multi: MultiValue, _: &mut VmContext) -> Result<Self, RuntimeError> {
        Ok(multi)
    }
}

impl FromMulti for () {
    #[inline]
    fn from_multi(_: MultiValue, _: &mut VmContext) -> Result<Self, RuntimeError> {
        Ok(())
    }
}

impl<T: FromValue> FromMulti for T {
    #[inline]
    fn from_multi(mut multi: MultiValue, ctx: &mut VmContext) -> Result<Self, RuntimeError> {
        T::from_value(multi.pop_front().unwrap_or(Value::Nil), ctx)
    }
}

impl<A: FromValue> FromMulti for (A,) {
    #[inline]
    fn from_multi(mut multi: MultiValue, ctx: &mut VmContext) -> Result<Self, RuntimeError> {
        Ok((A::from_value(multi.pop_front().unwrap_or(Value::Nil), ctx)?,))
    }
}

macro_rules! impl_from_multi {
    ($last:ident $($name:ident)+) => (
        impl<$($name: FromValue,)* $last: FromMulti> FromMulti for ($($name,)* $last,) {
            #[allow(non_snake_case)]
            #[inline]
            fn from_multi(mut multi: MultiValue, ctx: &mut VmContext) -> Result<Self, RuntimeError> {
                $(let $name = $name::from_value(multi.pop_front().unwrap_or(Value::Nil), ctx)?;)*
                let $last = $last::from_multi(multi, ctx)?;
                Ok(($($name,)* $last,))
            }
        }
    );
}

impl_from_multi! { A B }
impl_from_multi! { A B C }
impl_from_multi! { A B C D }
impl_from_multi! { A B C D E }
impl_from_multi! { A B C D E F }
impl_from_multi! { A B C D E F G }
impl_from_multi! { A B C D E F G H }

/// Automatically implemented for any [FromValue] type; tags conversion
/// failures with the argument position.
pub trait FromArg: Sized {
    /// `position` starts at 1
    fn from_arg(value: Value, position: usize, ctx: &mut VmContext) -> Result<Self, RuntimeError>;
}

impl<T: FromValue> FromArg for T {
    #[inline]
    fn from_arg(value: Value, position: usize, ctx: &mut VmContext) -> Result<Self, RuntimeError> {
        Self::from_value(value, ctx).map_err(|err| RuntimeError::new_bad_argument(position, err))
    }
}

pub trait FromArgs: Sized {
    fn from_args(
        args: MultiValue,
        position: usize,
        ctx: &mut VmContext,
    ) -> Result<Self, RuntimeError>;
}

impl FromArgs for MultiValue {
    #[inline]
    fn from_args(args: MultiValue, _: usize, _: &mut VmContext) -> Result<Self, RuntimeError> {
        Ok(args)
    }
}

impl FromArgs for () {
    #[inline]
    fn from_args(_: MultiValue, _: usize, _: &mut VmContext) -> Result<Self, RuntimeError> {
        Ok(())
    }
}

impl<T: FromArg> FromArgs for T {
    #[inline]
    fn from_args(
        mut multi: MultiValue,
        position: usize,
        ctx: &mut VmContext,
    ) -> Result<Self, RuntimeError> {
        T::from_arg(multi.pop_front().unwrap_or(Value::Nil), position, ctx)
    }
}

impl<A: FromArg> FromArgs for (A,) {
    #[inline]
    fn from_args(
        mut multi: MultiValue,
        position: usize,
        ctx: &mut VmContext,
    ) -> Result<Self, RuntimeError> {
        Ok((A::from_arg(
            multi.pop_front().unwrap_or(Value::Nil),
            position,
            ctx,
        )?,))
    }
}

macro_rules! impl_from_args {
    ($last:ident $($name:ident)+) => (
        impl<$($name: FromArg,)* $last: FromArgs> FromArgs for ($($name,)* $last,) {
            #[allow(non_snake_case)]
            #[inline]
            fn from_args(
                mut multi: MultiValue,
                mut position: usize,
                ctx: &mut VmContext,
            ) -> Result<Self, RuntimeError> {
                $(let $name = $name::from_arg(
                    multi.pop_front().unwrap_or(Value::Nil),
                    position,
                    ctx,
                )?;
                position += 1;)*

                let $last = $last::from_args(multi, position, ctx)?;

                Ok(($($name,)* $last,))
            }
        }
    );
}

impl_from_args! { A B }
impl_from_args! { A B C }
impl_from_args! { A B C D }
impl_from_args! { A B C D E }
impl_from_args! { A B C D E F }
impl_from_args! { A B C D E F G }
impl_from_args! { A B C D E F G H }

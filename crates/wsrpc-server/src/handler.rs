//! Typed handler functions.
//!
//! Any `Fn(CallContext, A1, .., An) -> Return` with up to eight [`Param`]
//! arguments is a [`Handler`]. The parameter list is taken from the function
//! signature at registration, so the declared shape always matches what the
//! function accepts. Incoming calls whose arguments do not fit get an
//! `ArgumentMismatch` failure without running the handler.
//!
//! Closures need their argument types spelled out:
//!
//! ```ignore
//! Service::new().reply("Add", |ctx: CallContext, a: i64, b: i64| ctx.ok(a + b))?;
//! ```

use crate::context::{CallContext, Return};
use crate::param::{Param, ParamKind};
use serde_json::Value;
use std::sync::Arc;
use wsrpc_protocol::ErrorKind;

/// A function that can serve calls. `Args` is the tuple of parameter types.
pub trait Handler<Args>: Send + Sync + 'static {
    /// Declared parameters, in order.
    const PARAMS: &'static [ParamKind];

    fn call(&self, ctx: CallContext, args: Vec<Value>) -> Return;
}

/// Handler with its argument types erased, as stored in a method table.
pub(crate) type BoxedHandler = Arc<dyn Fn(CallContext, Vec<Value>) -> Return + Send + Sync>;

pub(crate) fn erase<Args, H>(handler: H) -> BoxedHandler
where
    H: Handler<Args>,
    Args: 'static,
{
    Arc::new(move |ctx: CallContext, args: Vec<Value>| <H as Handler<Args>>::call(&handler, ctx, args))
}

fn arity_mismatch(ctx: CallContext, expected: usize, got: usize) -> Return {
    let message = format!(
        "{} expects {} argument(s), got {}",
        ctx.target(),
        expected,
        got
    );
    ctx.error(ErrorKind::ArgumentMismatch, message)
}

fn type_mismatch(ctx: CallContext, position: usize, expected: ParamKind) -> Return {
    let message = format!(
        "{}: argument {} must be {}",
        ctx.target(),
        position,
        expected
    );
    ctx.error(ErrorKind::ArgumentMismatch, message)
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<F, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn(CallContext, $($arg,)*) -> Return + Send + Sync + 'static,
            $($arg: Param,)*
        {
            const PARAMS: &'static [ParamKind] = &[$(<$arg as Param>::KIND),*];

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, ctx: CallContext, args: Vec<Value>) -> Return {
                let expected = <Self as Handler<($($arg,)*)>>::PARAMS.len();
                if args.len() != expected {
                    return arity_mismatch(ctx, expected, args.len());
                }

                let mut values = args.into_iter();
                let mut position = 0usize;
                $(
                    position += 1;
                    let $arg = match values.next().and_then(<$arg as Param>::from_value) {
                        Some(value) => value,
                        None => return type_mismatch(ctx, position, <$arg as Param>::KIND),
                    };
                )*

                (self)(ctx, $($arg,)*)
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);
impl_handler!(A1, A2, A3, A4, A5, A6, A7);
impl_handler!(A1, A2, A3, A4, A5, A6, A7, A8);

// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! Test utilities shared between the SFS crates.

/// A result type useful in tests, that wraps any error implementation.
pub type Result<T = ()> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Macro for creating parametrized *synchronous* tests.
///
/// Accepts the name of an existing function followed by a list of case names
/// and their arguments, and expands to a module with a `#[test]` function per
/// case. Test functions may return a type such as [`Result`], declared with
/// `-> <type>` after the function name. Attributes such as `#[ignore]` may be
/// attached to individual cases.
///
/// ```
/// # use sfs_test_utils::param_test;
/// param_test! {
///     test_sum: [
///         positive_sums: (10, 7, 17),
///         negative_sums: (-5, -3, -8),
///     ]
/// }
/// fn test_sum(lhs: i32, rhs: i32, sum: i32) {
///     assert_eq!(lhs + rhs, sum);
/// }
/// ```
#[macro_export]
macro_rules! param_test {
    ($func_name:ident -> $return_ty:ty: [
        $( $(#[$attr:meta])* $case_name:ident: ( $($args:expr),* $(,)? ) ),+$(,)?
    ]) => {
        mod $func_name {
            use super::*;

            $(
                #[test]
                $(#[$attr])*
                fn $case_name() -> $return_ty {
                    $func_name($($args),*)
                }
            )*
        }
    };
    ($func_name:ident: [
        $( $(#[$attr:meta])* $case_name:ident: ( $($args:expr),* $(,)? ) ),+$(,)?
    ]) => {
        $crate::param_test!(
            $func_name -> (): [ $( $(#[$attr])* $case_name: ( $($args),* ) ),+ ]
        );
    };
}

/// Macro for creating parametrized *asynchronous* tests.
///
/// Behaves like [`param_test`] but expects an `async` function and expands
/// each case with the `#[tokio::test]` attribute, so `tokio` must be a
/// dev-dependency of the calling crate.
#[macro_export]
macro_rules! async_param_test {
    ($func_name:ident -> $return_ty:ty: [
        $( $(#[$attr:meta])* $case_name:ident: ( $($args:expr),* $(,)? ) ),+$(,)?
    ]) => {
        mod $func_name {
            use super::*;

            $(
                #[tokio::test]
                $(#[$attr])*
                async fn $case_name() -> $return_ty {
                    $func_name($($args),*).await
                }
            )*
        }
    };
    ($func_name:ident: [
        $( $(#[$attr:meta])* $case_name:ident: ( $($args:expr),* $(,)? ) ),+$(,)?
    ]) => {
        $crate::async_param_test!(
            $func_name -> (): [ $( $(#[$attr])* $case_name: ( $($args),* ) ),+ ]
        );
    };
}

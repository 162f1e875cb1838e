//! Operation logging macros.
//!
//! Every engine operation emits exactly one `start` event and one of `end`
//! or `end_error`, each tagged with `component`, `op` and `event`. Callers
//! need `driftx_core_types` and `tracing` in scope as dependencies.

#[doc(hidden)]
#[macro_export]
macro_rules! __driftx_op_event {
    ($level:ident, $op:expr, $event:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = module_path!(),
            op = $op,
            event = $event,
            $($($field)*)?
        )
    };
}

/// Log the start of an operation
///
/// ```
/// # use driftx_core::log_op_start;
/// log_op_start!("commit");
/// log_op_start!("commit", actor = "alice", dry_run = true);
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr $(, $($field:tt)*)?) => {
        $crate::__driftx_op_event!(
            info,
            $op,
            driftx_core_types::schema::EVENT_START
            $(, $($field)*)?
        )
    };
}

/// Log the successful end of an operation; `duration_ms` is mandatory
///
/// ```
/// # use driftx_core::log_op_end;
/// log_op_end!("commit", duration_ms = 42, applied = 3);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {
        $crate::__driftx_op_event!(
            info,
            $op,
            driftx_core_types::schema::EVENT_END,
            duration_ms = $duration
            $(, $($field)*)?
        )
    };
}

/// Log a failed operation with the stable code of its error
///
/// `$err` is anything convertible into `ExError`, usually a cloned `DriftError`.
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        $crate::__driftx_op_event!(
            error,
            $op,
            driftx_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?ex_err.kind(),
            err.code = ex_err.code(),
            message = %ex_err
            $(, $($field)*)?
        )
    }};
}

use failure::Fail;
use std::{
    any::Any,
    cell::RefCell,
    fmt::Write,
    panic::{catch_unwind, UnwindSafe},
    sync::atomic::{AtomicU32, Ordering},
};

static NEXT_ERROR_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static LAST_RESULT: RefCell<Option<Recorded>> = RefCell::new(None);
}

/**
Why a shared pointer call failed.

The body of every `shared_*` function returns `Result<(), Error>`, so a
failed check can bail out with `?`.
 */
#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "the `{}` argument was null", _0)]
    ArgumentNull(&'static str),
    #[fail(display = "internal panic with '{}'", _0)]
    Panicked(String),
}

impl Error {
    fn kind(&self) -> Kind {
        match self {
            Error::ArgumentNull(_) => Kind::ArgumentNull,
            Error::Panicked(_) => Kind::InternalError,
        }
    }
}

/**
The status returned by every shared pointer call.

Errors carry an id that is unique within the process. The message for the
last status on the current thread is available through `shared_last_result`.
 */
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareResult {
    kind: Kind,
    id: u32,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Ok,
    BufferTooSmall,
    ArgumentNull,
    InternalError,
}

impl ShareResult {
    pub fn ok() -> Self {
        ShareResult {
            kind: Kind::Ok,
            id: 0,
        }
    }

    pub fn buffer_too_small() -> Self {
        ShareResult::failed(Kind::BufferTooSmall)
    }

    pub fn argument_null() -> Self {
        ShareResult::failed(Kind::ArgumentNull)
    }

    fn failed(kind: Kind) -> Self {
        ShareResult {
            kind,
            id: NEXT_ERROR_ID.fetch_add(1, Ordering::SeqCst),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.kind == Kind::Ok
    }

    pub fn is_buffer_too_small(&self) -> bool {
        self.kind == Kind::BufferTooSmall
    }

    pub fn is_argument_null(&self) -> bool {
        self.kind == Kind::ArgumentNull
    }

    pub fn is_internal_error(&self) -> bool {
        self.kind == Kind::InternalError
    }

    /// A generic description of the failure, if this isn't ok.
    pub fn as_err(&self) -> Option<&'static str> {
        match self.kind {
            Kind::Ok => None,
            Kind::ArgumentNull => Some("a required argument was null"),
            Kind::BufferTooSmall => Some("a supplied buffer was too small"),
            Kind::InternalError => Some("an internal error occurred"),
        }
    }

    /**
    Run the body of a shared pointer call.

    Panics become `InternalError`s. Whatever the outcome, it replaces the
    last result of this thread, so a successful call clears an earlier
    error message.
     */
    pub fn catch(f: impl FnOnce() -> Result<(), Error> + UnwindSafe) -> Self {
        let outcome = catch_unwind(f).unwrap_or_else(|panic| Err(Error::Panicked(panic_message(&panic))));

        let recorded = match outcome {
            Ok(()) => Recorded {
                value: ShareResult::ok(),
                message: None,
            },
            Err(e) => Recorded::from(e),
        };

        let value = recorded.value;
        LAST_RESULT.with(|last_result| *last_result.borrow_mut() = Some(recorded));

        value
    }

    /**
    Inspect the last result recorded on this thread.

    The message is only present for errors. It falls back to the generic
    description when the error came without one.
     */
    pub fn with_last_result<R>(f: impl FnOnce(Option<(ShareResult, Option<&str>)>) -> R) -> R {
        LAST_RESULT.with(|last_result| {
            let last_result = last_result.borrow();

            f(last_result.as_ref().map(|recorded| {
                let message = recorded
                    .value
                    .as_err()
                    .map(|generic| recorded.message.as_deref().unwrap_or(generic));

                (recorded.value, message)
            }))
        })
    }
}

#[derive(Debug)]
struct Recorded {
    value: ShareResult,
    message: Option<String>,
}

impl From<Error> for Recorded {
    fn from(e: Error) -> Self {
        let value = ShareResult::failed(e.kind());
        let message = describe(&e);

        match e {
            Error::Panicked(_) => error!("shared call {} panicked: {}", value.id, message.trim_end()),
            _ => debug!("shared call {} failed: {}", value.id, message.trim_end()),
        }

        Recorded {
            value,
            message: Some(message),
        }
    }
}

fn describe(err: &dyn Fail) -> String {
    let mut message = String::new();

    for (depth, cause) in err.iter_chain().enumerate() {
        if depth == 0 {
            let _ = writeln!(message, "{}.", cause);
        } else {
            let _ = writeln!(message, "   caused by: {}", cause);
        }
    }

    message
}

fn panic_message(panic: &Box<dyn Any + Send + 'static>) -> String {
    if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_owned()
    } else {
        "an unknown payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn last() -> (ShareResult, Option<String>) {
        ShareResult::with_last_result(|last| {
            let (value, msg) = last.expect("a result was recorded");
            (value, msg.map(str::to_owned))
        })
    }

    #[test]
    fn ok_replaces_an_earlier_error() {
        let _ = ShareResult::catch(|| Err(Error::ArgumentNull("handle")));

        let result = ShareResult::catch(|| Ok(()));
        assert!(result.is_ok());

        let (value, msg) = last();
        assert!(value.is_ok());
        assert!(msg.is_none());
    }

    #[test]
    fn question_mark_records_the_error() {
        fn check(present: bool) -> Result<(), Error> {
            if present {
                Ok(())
            } else {
                Err(Error::ArgumentNull("data"))
            }
        }

        let result = ShareResult::catch(|| {
            check(true)?;
            check(false)?;
            panic!("unreachable after the failed check");
        });
        assert!(result.is_argument_null());

        let (value, msg) = last();
        assert_eq!(result, value);
        assert_eq!(Some("the `data` argument was null.\n"), msg.as_deref());
    }

    #[test]
    fn each_error_gets_its_own_id() {
        let a = ShareResult::catch(|| Err(Error::ArgumentNull("handle")));
        let b = ShareResult::catch(|| Err(Error::ArgumentNull("handle")));

        assert!(a.is_argument_null());
        assert_ne!(a, b);
    }

    #[test]
    fn panic_becomes_internal_error() {
        let result = ShareResult::catch(|| panic!("explicit panic"));
        assert!(result.is_internal_error());

        let (_, msg) = last();
        assert_eq!(Some("internal panic with 'explicit panic'.\n"), msg.as_deref());
    }

    #[test]
    fn formatted_panic_payload_is_kept() {
        let result = ShareResult::catch(|| panic!("bad count {}", 3));
        assert!(result.is_internal_error());

        let (_, msg) = last();
        assert!(msg.unwrap().contains("bad count 3"));
    }
}

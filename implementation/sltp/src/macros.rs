/// Converts from Async::NotReady to ErrorKind::WouldBlock.
///
/// Expects `Async` and `ErrorKind` to be in scope at the call site.
macro_rules! try_would_block {
    ($val:expr) => {{
        match $val? {
            Async::Ready(result) => Ok(result),
            Async::NotReady => Err(ErrorKind::WouldBlock.into()),
        }
    }};
}

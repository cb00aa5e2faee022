//! The two reactor implementations behind [`AsyncIo`](super::AsyncIo).

mod epoll;
mod uring;

pub(crate) use epoll::EpollIo;
pub(crate) use uring::UringIo;
pub use uring::io_uring_supported;

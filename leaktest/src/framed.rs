use core::future::Future;
use core::mem::ManuallyDrop;
use core::pin::Pin;
use core::task::{Context, Poll};

use crate::frame::Frame;
use crate::location::Location;

use pin_project_lite::pin_project;

pin_project! {
    /// A future whose [`Location`] is included in [task dumps][crate::taskdump]
    /// and leak reports.
    ///
    /// The outermost `Framed` future of a call tree is a *task*: it is
    /// registered on its first poll and deregistered when dropped.
    pub struct Framed<F> {
        // The wrapped future. Dropped manually, from within `frame`'s scope.
        #[pin]
        future: ManuallyDrop<F>,
        // Metadata about the wrapped future.
        #[pin]
        frame: Frame,
    }

    impl<F> PinnedDrop for Framed<F> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            // SAFETY: `future` is pinned and is never used again.
            let drop_future = || unsafe { ManuallyDrop::drop(this.future.get_unchecked_mut()) };
            if this.frame.is_uninitialized() {
                // never polled, so never registered
                drop_future();
            } else {
                this.frame.in_scope(drop_future);
            }
        }
    }
}

impl<F> Framed<F> {
    /// Include the given `future` in task dumps with the given `location`.
    pub fn new(future: F, location: Location) -> Self {
        Self {
            future: ManuallyDrop::new(future),
            frame: Frame::new(location),
        }
    }
}

impl<F> Future for Framed<F>
where
    F: Future,
{
    type Output = <F as Future>::Output;

    #[track_caller]
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<<Self as Future>::Output> {
        let this = self.project();
        // SAFETY: `ManuallyDrop<F>` is pinned, so its contents are as well.
        let future = unsafe { this.future.map_unchecked_mut(|future| &mut **future) };
        this.frame.in_scope(|| future.poll(cx))
    }
}

impl<F: core::panic::UnwindSafe> core::panic::UnwindSafe for Framed<F> {}

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::Sleep;

use crate::{AsyncSeekStart, StreamConfig};

/// Upper bound on a single read buffer: 8 MiB. A misconfigured `chunk_size`
/// must not translate into an equally large allocation per read.
const MAX_READ_LEN: u64 = 8 * 1024 * 1024;

/// Response body stream. Implements [`Stream`], [`Body`], and [`IntoResponse`].
///
/// Reads the byte window `[start, start + length)` from the body one chunk at
/// a time, in strictly increasing offset order. Peak memory is bounded by one
/// chunk (capped at 8 MiB) regardless of the window length. When an
/// inter-chunk delay is configured, the stream suspends for that long after
/// every chunk it yields.
#[pin_project]
pub struct RangedStream<B> {
    state: StreamState,
    length: u64,
    config: StreamConfig,
    #[pin]
    body: B,
}

impl<B: AsyncRead + AsyncSeekStart> RangedStream<B> {
    pub(crate) fn new(body: B, start: u64, length: u64, config: StreamConfig) -> Self {
        RangedStream {
            state: StreamState::Seek { start },
            length,
            config,
            body,
        }
    }
}

#[derive(Debug)]
enum StreamState {
    Seek { start: u64 },
    Seeking { remaining: u64 },
    Reading { remaining: u64 },
    Throttle { sleep: Pin<Box<Sleep>>, remaining: u64 },
    Done,
}

impl<B: AsyncRead + AsyncSeekStart + Send + 'static> IntoResponse for RangedStream<B> {
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl<B: AsyncRead + AsyncSeekStart> Body for RangedStream<B> {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.length)
    }

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<io::Result<Frame<Bytes>>>> {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl<B: AsyncRead + AsyncSeekStart> Stream for RangedStream<B> {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<io::Result<Bytes>>> {
        let mut this = self.project();

        loop {
            match this.state {
                StreamState::Seek { start } => {
                    match this.body.as_mut().start_seek(*start) {
                        Err(e) => {
                            *this.state = StreamState::Done;
                            return Poll::Ready(Some(Err(e)));
                        }
                        Ok(()) => {
                            let remaining = *this.length;
                            *this.state = StreamState::Seeking { remaining };
                        }
                    }
                }

                StreamState::Seeking { remaining } => {
                    match this.body.as_mut().poll_complete(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => {
                            *this.state = StreamState::Done;
                            return Poll::Ready(Some(Err(e)));
                        }
                        Poll::Ready(Ok(())) => {
                            let remaining = *remaining;
                            *this.state = StreamState::Reading { remaining };
                        }
                    }
                }

                StreamState::Reading { remaining } => {
                    if *remaining == 0 {
                        *this.state = StreamState::Done;
                        return Poll::Ready(None);
                    }

                    // read at most one chunk per iteration, no matter how
                    // large the remaining window is; the buffer never
                    // exceeds MAX_READ_LEN
                    let nbytes = (*remaining)
                        .min(this.config.chunk_size)
                        .min(MAX_READ_LEN) as usize;

                    let mut buffer = BytesMut::with_capacity(nbytes);
                    let uninit = buffer.spare_capacity_mut();
                    let mut read_buf = ReadBuf::uninit(&mut uninit[0..nbytes]);

                    match this.body.as_mut().poll_read(cx, &mut read_buf) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => {
                            *this.state = StreamState::Done;
                            return Poll::Ready(Some(Err(e)));
                        }
                        Poll::Ready(Ok(())) => match read_buf.filled().len() {
                            0 => {
                                // end of file before the window was exhausted
                                *this.state = StreamState::Done;
                                return Poll::Ready(None);
                            }
                            n => {
                                // SAFETY: poll_read has filled the buffer with
                                // `n` additional bytes of its spare capacity
                                unsafe { buffer.set_len(n); }

                                // decrement by the bytes actually read: a short
                                // read must not shrink the window by a full
                                // chunk. `n` cannot exceed remaining due to
                                // the min above.
                                let remaining = *remaining - n as u64;

                                let delay = this.config.inter_chunk_delay;
                                *this.state = if remaining == 0 || delay.is_zero() {
                                    StreamState::Reading { remaining }
                                } else {
                                    StreamState::Throttle {
                                        sleep: Box::pin(tokio::time::sleep(delay)),
                                        remaining,
                                    }
                                };

                                return Poll::Ready(Some(Ok(buffer.freeze())));
                            }
                        },
                    }
                }

                StreamState::Throttle { sleep, remaining } => {
                    match sleep.as_mut().poll(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(()) => {
                            let remaining = *remaining;
                            *this.state = StreamState::Reading { remaining };
                        }
                    }
                }

                StreamState::Done => return Poll::Ready(None),
            }
        }
    }
}

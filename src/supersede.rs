/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Operation-scoped cancellation.
//!
//! Every outward-facing operation (one `get_frame`, one playback action)
//! carries an [`OperationToken`]. Beginning a new operation supersedes all
//! older ones: their pending suspension points fail fast with
//! [`FrameQError::Superseded`], which callers that do not track the old
//! operation simply drop. Work already handed to the decoder is never
//! rolled back.

use std::cell::Cell;
use std::rc::Rc;

use tokio::sync::Notify;

use crate::error::{FrameQError, Result};

/// Hands out generation-stamped tokens; the newest generation is the only
/// live one.
pub(crate) struct SupersedeController {
    generation: Rc<Cell<u64>>,
    notify: Rc<Notify>,
}

/// The handle a single logical operation threads through its suspension
/// points.
#[derive(Clone)]
pub(crate) struct OperationToken {
    generation: Rc<Cell<u64>>,
    id: u64,
    notify: Rc<Notify>,
}

impl SupersedeController {
    pub fn new() -> Self {
        Self {
            generation: Rc::new(Cell::new(0)),
            notify: Rc::new(Notify::new()),
        }
    }

    /// Starts a new operation, cancelling every previous one.
    pub fn begin(&self) -> OperationToken {
        let id = self.generation.get() + 1;
        self.generation.set(id);
        self.notify.notify_waiters();
        OperationToken {
            generation: self.generation.clone(),
            id,
            notify: self.notify.clone(),
        }
    }

    /// Cancels all outstanding operations without starting a new one.
    pub fn cancel_all(&self) {
        self.generation.set(self.generation.get() + 1);
        self.notify.notify_waiters();
    }
}

impl OperationToken {
    pub fn is_superseded(&self) -> bool {
        self.generation.get() != self.id
    }

    /// Fails fast when a newer operation has taken over.
    pub fn check(&self) -> Result<()> {
        if self.is_superseded() {
            Err(FrameQError::Superseded)
        } else {
            Ok(())
        }
    }

    /// Resolves once this operation has been superseded. Pending forever if
    /// it never is; intended for use inside `select!` against real work.
    pub async fn superseded(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_superseded() {
                return;
            }
            notified.await;
        }
    }
}

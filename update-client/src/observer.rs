// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! Events emitted as components move through an update run.

/// One notification per component state transition, plus repeated
/// notifications for download and install progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Events {
    /// The component is part of an update check that has been issued.
    ComponentCheckingForUpdates,
    /// The server returned an update for the component.
    ComponentUpdateFound,
    /// The component is queued behind other components of the same run.
    ComponentWait,
    /// A package (full or differential) is downloading; repeated on progress.
    ComponentUpdateDownloading,
    /// The package was fetched and verified; the installer takes over.
    ComponentUpdateReady,
    /// The installer reported progress.
    ComponentUpdateUpdating,
    /// The component reached `Updated`.
    ComponentUpdated,
    /// The component was already up to date.
    ComponentNotUpdated,
    /// The component's run terminated with an error.
    ComponentUpdateError,
}

pub trait Observer {
    /// Called on the client's sequence for every event. Implementations must
    /// not call back into the client or mutate shared state from here.
    fn on_event(&self, event: Events, id: &str);
}

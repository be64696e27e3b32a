// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The composite [`FunctionTable`] assembly: owns one engine per compiled-in
//! class function and routes the Core's calls to the right one by endpoint
//! number or `(ClassId, function_index)` (`§2`, `§9` "Cyclic reference core
//! <-> class").

use usbd_core::class::{CoreHandle, CtrlResponse, FunctionTable};
use usbd_core::descriptors::{ClassId, DescriptorSet};
use usbd_core::endpoint::EndpointAddress;
use usbd_core::setup::SetupPacket;

use crate::cdc::{CdcEngine, CdcHooks};
use crate::hid::{HidEngine, HidHooks};
use crate::msc::{MscEngine, ScsiMedia};
use crate::printer::{PrinterEngine, PrinterHooks};

const GET_MAX_LUN: u8 = 0xFE;
const BOT_RESET: u8 = 0xFF;

/// Application hooks for every compiled-in function, grouped so a board only
/// needs one type implementing the subset its build actually uses (`§6`).
pub trait Application: CdcHooks + PrinterHooks + HidHooks {
    type Media: ScsiMedia;

    /// Backing medium for the MSC LUN; only called when MSC is configured.
    fn media(&mut self) -> &mut Self::Media;
}

/// Which endpoint numbers belong to which engine, captured once out of the
/// descriptor set at [`Composite::configure`] time so dispatch is a handful
/// of integer comparisons instead of asking every engine in turn.
#[derive(Default)]
struct EndpointMap {
    msc: Option<(u8, u8)>,
    printer: Option<(u8, Option<u8>)>,
    hid: Option<(u8, Option<u8>)>,
}

/// Composite assembly of every class engine this crate implements. A board
/// constructs one of these alongside its [`DescriptorSet`] and hands it to
/// [`usbd_core::DeviceCore::poll`] as the `FunctionTable`.
pub struct Composite<A: Application> {
    app: A,
    cdc: CdcEngine,
    msc: MscEngine,
    printer: PrinterEngine,
    hid: HidEngine,
    endpoints: EndpointMap,
}

impl<A: Application> Composite<A> {
    pub fn new(app: A) -> Self {
        Self {
            app,
            cdc: CdcEngine::new(),
            msc: MscEngine::new(),
            printer: PrinterEngine::new(),
            hid: HidEngine::new(),
            endpoints: EndpointMap::default(),
        }
    }

    /// Bind every engine to the endpoint/interface numbers the descriptor
    /// builder assigned, called once after `DescriptorBuilder::build`.
    pub fn configure(&mut self, descriptors: &DescriptorSet) {
        self.cdc.configure(descriptors.cdc_channels());
        self.endpoints.msc = descriptors.msc_endpoints();
        if let Some((out_ep, in_ep)) = self.endpoints.msc {
            self.msc.configure(out_ep, in_ep);
        }
        self.endpoints.printer = descriptors.printer_endpoints();
        if let Some((out_ep, in_ep)) = self.endpoints.printer {
            self.printer.configure(out_ep, in_ep);
        }
        self.endpoints.hid = descriptors.hid_endpoints();
        if let Some((in_ep, _)) = self.endpoints.hid {
            self.hid.configure(in_ep);
        }
    }

    pub fn app(&mut self) -> &mut A {
        &mut self.app
    }

    pub fn cdc(&self) -> &CdcEngine {
        &self.cdc
    }

    pub fn msc(&self) -> &MscEngine {
        &self.msc
    }

    pub fn printer(&self) -> &PrinterEngine {
        &self.printer
    }

    pub fn hid(&self) -> &HidEngine {
        &self.hid
    }
}

impl<A: Application> FunctionTable for Composite<A> {
    fn class_request(
        &mut self,
        handle: &mut CoreHandle<'_>,
        class_id: ClassId,
        function_index: u8,
        setup: &SetupPacket,
        out_data: &[u8],
        response_buf: &mut [u8],
    ) -> CtrlResponse {
        let _ = handle;
        match class_id {
            ClassId::Cdc => self.cdc.class_request(&mut self.app, function_index, setup, out_data, response_buf),
            ClassId::Msc => match setup.request {
                GET_MAX_LUN => {
                    response_buf[0] = self.msc.get_max_lun();
                    CtrlResponse::Data { len: 1, auto_zlp: false }
                }
                BOT_RESET => {
                    self.msc.bot_reset();
                    CtrlResponse::Ok
                }
                _ => CtrlResponse::Stall,
            },
            ClassId::Printer => self.printer.class_request(&mut self.app, setup, response_buf),
            ClassId::Hid => self.hid.class_request(setup, out_data, response_buf),
        }
    }

    fn clear_ep_stall_hook(&mut self, handle: &mut CoreHandle<'_>, ep: EndpointAddress) {
        self.cdc.clear_ep_stall_hook(handle, ep);
        self.msc.clear_ep_stall_hook(ep, handle);
        self.printer.clear_ep_stall_hook(ep, handle);
        self.hid.clear_ep_stall_hook(ep, handle);
    }

    fn bus_reset(&mut self, _handle: &mut CoreHandle<'_>) {
        self.cdc.bus_reset();
        self.msc.bus_reset();
        self.printer.bus_reset();
        self.hid.bus_reset();
    }

    fn suspend(&mut self) {}

    fn resume(&mut self, _handle: &mut CoreHandle<'_>) {}

    fn sof(&mut self, handle: &mut CoreHandle<'_>) {
        self.cdc.sof(&mut self.app, handle);
        self.hid.sof(&mut self.app, handle);
    }

    fn out_ep_handler(&mut self, handle: &mut CoreHandle<'_>, ep: EndpointAddress, data: &[u8]) {
        if self.endpoints.msc.is_some_and(|(out_ep, _)| out_ep == ep.number) {
            let (msc, app) = (&self.msc, &mut self.app);
            msc.out_ep_handler(app.media(), data, handle);
            return;
        }
        if self.endpoints.printer.is_some_and(|(out_ep, _)| out_ep == ep.number) {
            self.printer.out_ep_handler(&mut self.app, data, handle);
            return;
        }
        if self.endpoints.hid.is_some_and(|(_, out_ep)| out_ep == Some(ep.number)) {
            self.hid.out_ep_handler(&mut self.app, handle);
            return;
        }
        self.cdc.out_ep_handler(&mut self.app, ep, data, handle);
    }

    fn in_ep_handler(&mut self, handle: &mut CoreHandle<'_>, ep: EndpointAddress) {
        if self.endpoints.msc.is_some_and(|(_, in_ep)| in_ep == ep.number) {
            let (msc, app) = (&self.msc, &mut self.app);
            msc.in_ep_handler(app.media(), handle);
            return;
        }
        if self.endpoints.printer.is_some_and(|(_, in_ep)| in_ep == Some(ep.number)) {
            self.printer.in_ep_handler(handle);
            return;
        }
        if self.endpoints.hid.is_some_and(|(in_ep, _)| in_ep == ep.number) {
            self.hid.in_ep_handler(handle);
            return;
        }
        self.cdc.in_ep_handler(&mut self.app, ep, handle);
    }
}

// QBXMLRP2.RequestProcessor over COM automation (IDispatch)

use windows::core::{BSTR, GUID, HSTRING, IUnknown, PCWSTR, VARIANT};
use windows::Win32::System::Com::{
    CLSIDFromProgID, CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_LOCAL_SERVER,
    COINIT_APARTMENTTHREADED, DISPATCH_METHOD, DISPPARAMS, EXCEPINFO, IDispatch,
};

use super::{ConnectionHandle, ConnectionType, FileMode, SessionTicket, Transport, TransportError};

const PROG_ID: &str = "QBXMLRP2.RequestProcessor";
const LCID_ENGLISH_US: u32 = 0x0409;

/// Method ids looked up once after the dispatch object is created.
struct MethodIds {
    open_connection: i32,
    begin_session: i32,
    process_request: i32,
    end_session: i32,
    close_connection: i32,
}

/// Request processor created through `CoCreateInstance`.
pub struct ComTransport {
    processor: Option<(IDispatch, MethodIds)>,
    com_initialized: bool,
}

impl Default for ComTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ComTransport {
    pub fn new() -> Self {
        Self {
            processor: None,
            com_initialized: false,
        }
    }

    fn processor(&self) -> Result<&(IDispatch, MethodIds), TransportError> {
        self.processor
            .as_ref()
            .ok_or_else(|| TransportError::new("request processor has not been dispatched"))
    }

    fn method_id(dispatch: &IDispatch, name: &str) -> Result<i32, TransportError> {
        let mut dispid = -1i32;
        let method_name = HSTRING::from(name);
        let names = [PCWSTR::from_raw(method_name.as_ptr())];
        unsafe {
            dispatch
                .GetIDsOfNames(&GUID::zeroed(), names.as_ptr(), 1, LCID_ENGLISH_US, &mut dispid)
                .map_err(|e| TransportError::new(format!("GetIDsOfNames({name}) failed: {e}")))?;
        }
        Ok(dispid)
    }

    /// Invokes a method with `args` given in declaration order.
    fn invoke(&self, dispid: i32, method: &str, args: Vec<VARIANT>) -> Result<VARIANT, TransportError> {
        let (dispatch, _) = self.processor()?;
        // IDispatch expects arguments last-to-first.
        let mut args = args;
        args.reverse();
        let params = DISPPARAMS {
            rgvarg: if args.is_empty() { std::ptr::null_mut() } else { args.as_mut_ptr() },
            rgdispidNamedArgs: std::ptr::null_mut(),
            cArgs: args.len() as u32,
            cNamedArgs: 0,
        };
        let mut result = VARIANT::default();
        let mut excepinfo = EXCEPINFO::default();
        let mut arg_err = 0u32;
        let outcome = unsafe {
            dispatch.Invoke(
                dispid,
                &GUID::zeroed(),
                LCID_ENGLISH_US,
                DISPATCH_METHOD,
                &params,
                Some(&mut result),
                Some(&mut excepinfo),
                Some(&mut arg_err),
            )
        };
        match outcome {
            Ok(()) => Ok(result),
            Err(e) => {
                let description = excepinfo.bstrDescription.to_string();
                log::error!("COM Invoke failed: method={method}, HRESULT=0x{:08X}, description='{description}'", e.code().0);
                if description.is_empty() {
                    Err(TransportError::new(format!("{method} failed: {e}")))
                } else {
                    Err(TransportError::new(format!("{method} failed: {description}")))
                }
            }
        }
    }
}

fn bstr(value: &str) -> VARIANT {
    VARIANT::from(BSTR::from(value))
}

fn variant_to_string(method: &str, variant: &VARIANT) -> Result<String, TransportError> {
    BSTR::try_from(variant)
        .map(|value| value.to_string())
        .map_err(|e| TransportError::new(format!("{method} did not return a string: {e}")))
}

impl Transport for ComTransport {
    fn dispatch(&mut self) -> Result<(), TransportError> {
        if !self.com_initialized {
            unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) }
                .ok()
                .map_err(|e| TransportError::new(format!("COM initialization failed: {e}")))?;
            self.com_initialized = true;
        }

        log::info!("Creating COM instance for ProgID: {}", PROG_ID);
        let prog_id = HSTRING::from(PROG_ID);
        let clsid = unsafe { CLSIDFromProgID(&prog_id) }
            .map_err(|e| TransportError::new(format!("ProgID {PROG_ID} not found: {e}")))?;
        let dispatch: IDispatch =
            unsafe { CoCreateInstance::<Option<&IUnknown>, IDispatch>(&clsid, None, CLSCTX_LOCAL_SERVER) }
                .map_err(|e| TransportError::new(format!("could not create {PROG_ID}: {e}")))?;

        let ids = MethodIds {
            open_connection: Self::method_id(&dispatch, "OpenConnection2")?,
            begin_session: Self::method_id(&dispatch, "BeginSession")?,
            process_request: Self::method_id(&dispatch, "ProcessRequest")?,
            end_session: Self::method_id(&dispatch, "EndSession")?,
            close_connection: Self::method_id(&dispatch, "CloseConnection")?,
        };
        self.processor = Some((dispatch, ids));
        Ok(())
    }

    fn open_connection(
        &mut self,
        application_id: &str,
        application_name: &str,
        connection_type: ConnectionType,
    ) -> Result<ConnectionHandle, TransportError> {
        let dispid = self.processor()?.1.open_connection;
        let args = vec![
            bstr(application_id),
            bstr(application_name),
            VARIANT::from(connection_type as i32),
        ];
        self.invoke(dispid, "OpenConnection2", args)?;
        Ok(ConnectionHandle(application_name.to_string()))
    }

    fn begin_session(
        &mut self,
        _connection: &ConnectionHandle,
        company_file: &str,
        mode: FileMode,
    ) -> Result<SessionTicket, TransportError> {
        let dispid = self.processor()?.1.begin_session;
        let result = self.invoke(dispid, "BeginSession", vec![bstr(company_file), VARIANT::from(mode as i32)])?;
        let ticket = variant_to_string("BeginSession", &result)?;
        if ticket.is_empty() {
            log::warn!("BeginSession returned an empty ticket string");
        }
        Ok(SessionTicket(ticket))
    }

    fn process_request(&mut self, ticket: &SessionTicket, request: &str) -> Result<String, TransportError> {
        let dispid = self.processor()?.1.process_request;
        let result = self.invoke(dispid, "ProcessRequest", vec![bstr(&ticket.0), bstr(request)])?;
        variant_to_string("ProcessRequest", &result)
    }

    fn end_session(&mut self, ticket: &SessionTicket) -> Result<(), TransportError> {
        let dispid = self.processor()?.1.end_session;
        self.invoke(dispid, "EndSession", vec![bstr(&ticket.0)])?;
        Ok(())
    }

    fn close_connection(&mut self, _connection: &ConnectionHandle) -> Result<(), TransportError> {
        let dispid = self.processor()?.1.close_connection;
        self.invoke(dispid, "CloseConnection", Vec::new())?;
        Ok(())
    }
}

impl Drop for ComTransport {
    fn drop(&mut self) {
        // Release the dispatch object before tearing COM down.
        self.processor = None;
        if self.com_initialized {
            unsafe { CoUninitialize() };
        }
    }
}

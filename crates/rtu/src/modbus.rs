//! Modbus TCP fieldbus server. Supervisory clients (Ignition, mbpoll, ...)
//! connect here as if to a real RTU: coils carry operator commands in,
//! the other three banks publish plant state out.
//!
//! The service is a thin adapter over [`RegisterMap`]; every request takes
//! the shared lock once and never holds it across an await. Requests the
//! bank cannot satisfy answer the standard Modbus exceptions. Like the
//! hardware it imitates, the server answers whatever unit id the client
//! addresses (conventionally 1).

use std::future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tokio_modbus::ExceptionCode;

use crate::registers::RegisterMap;

#[derive(Clone)]
pub struct RtuService {
    registers: Arc<Mutex<RegisterMap>>,
}

impl RtuService {
    pub fn new(registers: Arc<Mutex<RegisterMap>>) -> Self {
        Self { registers }
    }
}

impl tokio_modbus::server::Service for RtuService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let Ok(mut regs) = self.registers.lock() else {
            return future::ready(Err(ExceptionCode::ServerDeviceFailure));
        };

        let res = match req {
            Request::ReadCoils(addr, cnt) => regs
                .read_coils(addr, cnt)
                .map(Response::ReadCoils)
                .ok_or(ExceptionCode::IllegalDataAddress),
            Request::ReadDiscreteInputs(addr, cnt) => regs
                .read_discrete_inputs(addr, cnt)
                .map(Response::ReadDiscreteInputs)
                .ok_or(ExceptionCode::IllegalDataAddress),
            Request::ReadHoldingRegisters(addr, cnt) => regs
                .read_holding_registers(addr, cnt)
                .map(Response::ReadHoldingRegisters)
                .ok_or(ExceptionCode::IllegalDataAddress),
            Request::ReadInputRegisters(addr, cnt) => regs
                .read_input_registers(addr, cnt)
                .map(Response::ReadInputRegisters)
                .ok_or(ExceptionCode::IllegalDataAddress),
            Request::WriteSingleCoil(addr, value) => regs
                .write_coils(addr, &[value])
                .map(|()| Response::WriteSingleCoil(addr, value))
                .ok_or(ExceptionCode::IllegalDataAddress),
            Request::WriteMultipleCoils(addr, values) => regs
                .write_coils(addr, &values)
                .map(|()| Response::WriteMultipleCoils(addr, values.len() as u16))
                .ok_or(ExceptionCode::IllegalDataAddress),
            Request::WriteSingleRegister(addr, value) => regs
                .write_holding_registers(addr, &[value])
                .map(|()| Response::WriteSingleRegister(addr, value))
                .ok_or(ExceptionCode::IllegalDataAddress),
            Request::WriteMultipleRegisters(addr, values) => regs
                .write_holding_registers(addr, &values)
                .map(|()| Response::WriteMultipleRegisters(addr, values.len() as u16))
                .ok_or(ExceptionCode::IllegalDataAddress),
            _ => Err(ExceptionCode::IllegalFunction),
        };

        future::ready(res)
    }
}

/// Run the Modbus TCP server until the task is dropped.
pub async fn serve(registers: Arc<Mutex<RegisterMap>>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind modbus port {port}"))?;
    tracing::info!(%addr, "modbus tcp server listening (unit id 1)");

    let service = RtuService::new(registers);
    let new_service = move |_socket_addr: SocketAddr| Ok(Some(service.clone()));
    let on_connected = move |stream, socket_addr| {
        let new_service = new_service.clone();
        async move { accept_tcp_connection(stream, socket_addr, new_service) }
    };
    let on_process_error = |err: std::io::Error| {
        // A misbehaving client must not take the fieldbus down.
        tracing::warn!("modbus connection error: {err}");
    };

    Server::new(listener)
        .serve(&on_connected, on_process_error)
        .await
        .context("modbus server terminated")?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

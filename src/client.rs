//! Typed calls against the dispatcher, shared by drones and producers.

use std::net::SocketAddr;

use crate::error::{RpcError, TransportError};
use crate::protocol::{Caller, Method, ReplyBody, TravelPlan};
use crate::rpc::{RetryPolicy, RpcClient};
use crate::scheduler::NextEvent;
use crate::types::{FaultKind, FireEvent, Point, ProducerId};

pub struct DispatcherClient {
    rpc: RpcClient,
}

fn unexpected(method: &'static str, body: ReplyBody) -> RpcError {
    RpcError::UnexpectedReply {
        method,
        reply: body.kind().to_string(),
    }
}

impl DispatcherClient {
    pub fn connect(caller: Caller, server: SocketAddr, policy: RetryPolicy) -> Result<Self, TransportError> {
        Ok(Self {
            rpc: RpcClient::connect(caller, server, policy)?,
        })
    }

    /// Lose the next reply on purpose (simulated packet loss).
    pub fn drop_next_reply(&mut self) {
        self.rpc.drop_next_reply();
    }

    fn ack(&mut self, call: Method) -> Result<(), RpcError> {
        let method = call.name();
        match self.rpc.call(call)? {
            ReplyBody::Ack => Ok(()),
            other => Err(unexpected(method, other)),
        }
    }

    fn maybe_event(&mut self, call: Method) -> Result<Option<FireEvent>, RpcError> {
        let method = call.name();
        match self.rpc.call(call)? {
            ReplyBody::Event(event) => Ok(event),
            other => Err(unexpected(method, other)),
        }
    }

    pub fn add_fire_event(&mut self, event: FireEvent) -> Result<(), RpcError> {
        self.ack(Method::AddFireEvent(event))
    }

    pub fn next_fire_event(&mut self) -> Result<NextEvent, RpcError> {
        match self.rpc.call(Method::GetNextFireEvent)? {
            ReplyBody::Event(Some(event)) => Ok(NextEvent::Assigned(event)),
            ReplyBody::Event(None) | ReplyBody::Wait => Ok(NextEvent::Wait),
            ReplyBody::Stop => Ok(NextEvent::Stop),
            other => Err(unexpected("GET_NEXT_FIRE_EVENT", other)),
        }
    }

    pub fn next_assigned_event(&mut self, position: Point) -> Result<Option<FireEvent>, RpcError> {
        self.maybe_event(Method::GetNextAssignedEvent {
            x: position.x,
            y: position.y,
        })
    }

    pub fn additional_fire_event(&mut self, battery: f64, position: Point) -> Result<Option<FireEvent>, RpcError> {
        self.maybe_event(Method::GetAdditionalFireEvent {
            battery,
            x: position.x,
            y: position.y,
        })
    }

    pub fn update_status(&mut self, event: FireEvent, dispensed: i32) -> Result<(), RpcError> {
        self.ack(Method::UpdateStatus { event, dispensed })
    }

    pub fn report_fault(&mut self, event: FireEvent, fault: FaultKind) -> Result<(), RpcError> {
        self.ack(Method::HandleDroneFault { event, fault })
    }

    pub fn set_events_loaded(&mut self, producer: ProducerId) -> Result<(), RpcError> {
        self.ack(Method::SetEventsLoaded(producer))
    }

    pub fn release_event(&mut self, event: FireEvent) -> Result<(), RpcError> {
        self.ack(Method::ReleaseEvent(event))
    }

    pub fn travel_plan(&mut self, from: Point, event: &FireEvent) -> Result<TravelPlan, RpcError> {
        let call = Method::CalculateTravelTime {
            x: from.x,
            y: from.y,
            zone_id: event.zone_id,
        };
        match self.rpc.call(call)? {
            ReplyBody::Travel(plan) => Ok(plan),
            other => Err(unexpected("CALCULATE_TRAVEL_TIME", other)),
        }
    }
}

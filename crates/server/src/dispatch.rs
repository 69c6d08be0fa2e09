//! Response routing shared by both servers.
use hyperion_net::{ConnId, Registry};
use hyperion_wire::{self as wire, actions, Value};

/// How a handler's return value travels back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// Answer only the requesting connection.
    Single,
    /// Answer every connection of this server.
    All,
}

/// Encode `(<action>_response, [ret])` and enqueue it according to the
/// response type. The caller wakes the reactor afterwards.
pub fn respond(
    registry: &Registry,
    conn: &ConnId,
    action: &str,
    ret: Value,
    response_type: ResponseType,
) -> Result<(), wire::Error> {
    let message = wire::encode_request(&actions::response_name(action), vec![ret])?;

    match response_type {
        ResponseType::Single => {
            registry.enqueue(conn, message);
        }
        ResponseType::All => registry.broadcast(&message),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hyperion_net::Registry;
    use hyperion_wire::{actions, Decoder, Value};

    use super::{respond, ResponseType};

    fn conn(port: u16) -> hyperion_net::ConnId {
        ([127, 0, 0, 1], port).into()
    }

    #[test]
    fn single_responses_reach_only_the_origin() {
        let registry = Arc::new(Registry::new());
        registry.register(conn(1));
        registry.register(conn(2));

        respond(
            &registry,
            &conn(1),
            actions::GET_CONF,
            Value::from("snapshot"),
            ResponseType::Single,
        )
        .unwrap();

        let frame = registry.outbox(&conn(1)).unwrap().try_recv().unwrap();
        assert!(registry.outbox(&conn(2)).unwrap().try_recv().is_none());

        let mut decoder = Decoder::new(frame.len());
        decoder.input(&frame);
        let envelope = decoder.decode_next().unwrap().unwrap();
        assert_eq!(envelope.action.as_deref(), Some("get_conf_response"));
    }

    #[test]
    fn broadcast_responses_reach_everyone() {
        let registry = Arc::new(Registry::new());
        registry.register(conn(1));
        registry.register(conn(2));

        respond(
            &registry,
            &conn(1),
            "announce",
            Value::from(1i64),
            ResponseType::All,
        )
        .unwrap();

        for (_, outbox) in registry.queues() {
            assert_eq!(outbox.len(), 1);
        }
    }
}

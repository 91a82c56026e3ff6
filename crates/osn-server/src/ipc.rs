//! `Fader`, `Volmeter` and `CallbackManager` IPC collections.

use std::sync::Arc;

use osn_engine::{FaderType, VolumeLevels};
use osn_ipc::{reply_error, reply_ok, Collection, Function, IpcResult, Server, Type, Value};

use crate::audio::AudioBindings;
use crate::error::BindingError;
use crate::object::Handle;
use crate::polled::decode_handles;
use crate::BindingResult;

// Arguments are type-checked by the dispatcher before a handler runs, so
// the fallbacks below only matter for direct misuse.

fn handle_arg(args: &[Value], index: usize) -> Handle {
    args.get(index).and_then(Value::as_u32).unwrap_or(u32::MAX)
}

fn float_arg(args: &[Value], index: usize) -> f32 {
    args.get(index)
        .and_then(Value::as_f64)
        .map_or(f32::NAN, |v| v as f32)
}

fn kind_arg(args: &[Value]) -> BindingResult<FaderType> {
    let raw = args.first().and_then(Value::as_i32).unwrap_or(-1);
    FaderType::from_i32(raw)
        .ok_or_else(|| BindingError::InvalidArgument(format!("fader type {raw}")))
}

fn levels_values(levels: &VolumeLevels) -> [Value; 4] {
    [
        Value::Float(levels.level),
        Value::Float(levels.magnitude),
        Value::Float(levels.peak),
        Value::UInt32(u32::from(levels.muted)),
    ]
}

fn respond<T, F>(context: &str, result: BindingResult<T>, values: F) -> Vec<Value>
where
    F: FnOnce(T) -> Vec<Value>,
{
    match result {
        Ok(value) => reply_ok(values(value)),
        Err(err) => reply_error(err.code(), context, err.to_string()),
    }
}

type Op = fn(&AudioBindings, &[Value]) -> Vec<Value>;

fn function(audio: &Arc<AudioBindings>, name: &str, params: Vec<Type>, op: Op) -> Function {
    let audio = Arc::clone(audio);
    Function::new(name, params, move |args: &[Value]| op(&audio, args))
}

fn fader_collection(audio: &Arc<AudioBindings>) -> Collection {
    let ops: [(&str, Vec<Type>, Op); 13] = [
        ("Create", vec![Type::Int32], |a, args| {
            let result = kind_arg(args).and_then(|kind| a.fader_create(kind));
            respond("Fader::Create", result, |h| vec![Value::UInt32(h)])
        }),
        ("Destroy", vec![Type::UInt32], |a, args| {
            respond("Fader::Destroy", a.fader_destroy(handle_arg(args, 0)), |()| {
                Vec::new()
            })
        }),
        ("GetDeziBel", vec![Type::UInt32], |a, args| {
            let result = a.fader_get_db(handle_arg(args, 0));
            respond("Fader::GetDeziBel", result, |db| vec![Value::Float(db)])
        }),
        ("SetDeziBel", vec![Type::UInt32, Type::Float], |a, args| {
            let result = a.fader_set_db(handle_arg(args, 0), float_arg(args, 1));
            respond("Fader::SetDeziBel", result, |db| vec![Value::Float(db)])
        }),
        ("GetDeflection", vec![Type::UInt32], |a, args| {
            let result = a.fader_get_deflection(handle_arg(args, 0));
            respond("Fader::GetDeflection", result, |def| vec![Value::Float(def)])
        }),
        ("SetDeflection", vec![Type::UInt32, Type::Float], |a, args| {
            let result = a.fader_set_deflection(handle_arg(args, 0), float_arg(args, 1));
            respond("Fader::SetDeflection", result, |def| vec![Value::Float(def)])
        }),
        ("GetMultiplier", vec![Type::UInt32], |a, args| {
            let result = a.fader_get_mul(handle_arg(args, 0));
            respond("Fader::GetMultiplier", result, |mul| vec![Value::Float(mul)])
        }),
        ("SetMultiplier", vec![Type::UInt32, Type::Float], |a, args| {
            let result = a.fader_set_mul(handle_arg(args, 0), float_arg(args, 1));
            respond("Fader::SetMultiplier", result, |mul| vec![Value::Float(mul)])
        }),
        ("Attach", vec![Type::UInt32, Type::String], |a, args| {
            let source = args.get(1).and_then(Value::as_str).unwrap_or_default();
            let result = a.fader_attach(handle_arg(args, 0), source);
            respond("Fader::Attach", result, |()| Vec::new())
        }),
        ("Detach", vec![Type::UInt32], |a, args| {
            respond("Fader::Detach", a.fader_detach(handle_arg(args, 0)), |()| {
                Vec::new()
            })
        }),
        ("AddCallback", vec![Type::UInt32], |a, args| {
            respond("Fader::AddCallback", a.fader_add_polled(handle_arg(args, 0)), |(cb, n)| {
                vec![Value::UInt32(cb), Value::UInt32(n)]
            })
        }),
        ("RemoveCallback", vec![Type::UInt32, Type::UInt32], |a, args| {
            let result = a.fader_remove_polled(handle_arg(args, 0), handle_arg(args, 1));
            respond("Fader::RemoveCallback", result, |n| vec![Value::UInt32(n)])
        }),
        ("Query", vec![Type::UInt32], |a, args| {
            respond("Fader::Query", a.fader_query(handle_arg(args, 0)), |changes| {
                let mut values = vec![Value::from(changes.len() as u32)];
                values.extend(changes.into_iter().map(Value::Float));
                values
            })
        }),
    ];

    let mut cls = Collection::new("Fader");
    for (name, params, op) in ops {
        cls.register_function(function(audio, name, params, op));
    }
    cls
}

fn volmeter_collection(audio: &Arc<AudioBindings>) -> Collection {
    let ops: [(&str, Vec<Type>, Op); 9] = [
        ("Create", vec![Type::Int32], |a, args| {
            let result = kind_arg(args).and_then(|kind| a.volmeter_create(kind));
            respond("Volmeter::Create", result, |(h, interval)| {
                vec![Value::UInt32(h), Value::UInt32(interval)]
            })
        }),
        ("Destroy", vec![Type::UInt32], |a, args| {
            respond("Volmeter::Destroy", a.volmeter_destroy(handle_arg(args, 0)), |()| {
                Vec::new()
            })
        }),
        ("GetUpdateInterval", vec![Type::UInt32], |a, args| {
            let result = a.volmeter_get_update_interval(handle_arg(args, 0));
            respond("Volmeter::GetUpdateInterval", result, |ms| vec![Value::UInt32(ms)])
        }),
        ("SetUpdateInterval", vec![Type::UInt32, Type::UInt32], |a, args| {
            let ms = args.get(1).and_then(Value::as_u32).unwrap_or(0);
            let result = a.volmeter_set_update_interval(handle_arg(args, 0), ms);
            respond("Volmeter::SetUpdateInterval", result, |ms| vec![Value::UInt32(ms)])
        }),
        ("Attach", vec![Type::UInt32, Type::String], |a, args| {
            let source = args.get(1).and_then(Value::as_str).unwrap_or_default();
            let result = a.volmeter_attach(handle_arg(args, 0), source);
            respond("Volmeter::Attach", result, |()| Vec::new())
        }),
        ("Detach", vec![Type::UInt32], |a, args| {
            respond("Volmeter::Detach", a.volmeter_detach(handle_arg(args, 0)), |()| {
                Vec::new()
            })
        }),
        ("AddCallback", vec![Type::UInt32], |a, args| {
            let result = a.volmeter_add_polled(handle_arg(args, 0));
            respond("Volmeter::AddCallback", result, |(cb, n)| {
                vec![Value::UInt32(cb), Value::UInt32(n)]
            })
        }),
        ("RemoveCallback", vec![Type::UInt32, Type::UInt32], |a, args| {
            let result = a.volmeter_remove_polled(handle_arg(args, 0), handle_arg(args, 1));
            respond("Volmeter::RemoveCallback", result, |n| vec![Value::UInt32(n)])
        }),
        ("Query", vec![Type::UInt32], |a, args| {
            respond("Volmeter::Query", a.volmeter_query(handle_arg(args, 0)), |levels| {
                levels_values(&levels).to_vec()
            })
        }),
    ];

    let mut cls = Collection::new("Volmeter");
    for (name, params, op) in ops {
        cls.register_function(function(audio, name, params, op));
    }
    cls
}

/// `GlobalQuery(Binary)`: the argument is a list of little-endian `u32`
/// meter handles. The reply is the entry count followed by
/// `handle, level, magnitude, peak, muted` per live meter.
fn callback_manager_collection(audio: &Arc<AudioBindings>) -> Collection {
    let mut cls = Collection::new("CallbackManager");
    cls.register_function(function(audio, "GlobalQuery", vec![Type::Binary], |a, args| {
        let raw = args.first().and_then(Value::as_binary).map_or(&[][..], |b| &b[..]);
        let result = decode_handles(raw).map(|handles| a.global_query(&handles));
        respond("CallbackManager::GlobalQuery", result, |entries| {
            let mut values = Vec::with_capacity(1 + entries.len() * 5);
            values.push(Value::from(entries.len() as u32));
            for (handle, levels) in &entries {
                values.push(Value::UInt32(*handle));
                values.extend(levels_values(levels));
            }
            values
        })
    }));
    cls
}

/// Register the `Fader`, `Volmeter` and `CallbackManager` collections on
/// `server`.
pub fn register(server: &mut Server, audio: Arc<AudioBindings>) -> IpcResult<()> {
    server.register_collection(fader_collection(&audio))?;
    server.register_collection(volmeter_collection(&audio))?;
    server.register_collection(callback_manager_collection(&audio))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use osn_engine::Engine;
    use osn_events::EventLoop;
    use osn_ipc::{split_reply, ErrorCode, IpcError};

    use super::*;
    use crate::config::BindingsConfig;
    use crate::polled::SILENCE_DB;
    use crate::registry::Registry;

    fn server_with_registry() -> (EventLoop, Arc<Engine>, Arc<Registry>, Server) {
        let event_loop = EventLoop::new();
        let registry = Registry::init(&BindingsConfig::default(), event_loop.handle());
        let engine = Arc::new(Engine::new());
        let audio = AudioBindings::new(Arc::clone(&registry), Arc::clone(&engine));

        let mut server = Server::new();
        register(&mut server, audio).unwrap();
        (event_loop, engine, registry, server)
    }

    fn server() -> (EventLoop, Arc<Engine>, Server) {
        let (event_loop, engine, _, server) = server_with_registry();
        (event_loop, engine, server)
    }

    fn call(server: &Server, cls: &str, func: &str, args: &[Value]) -> (ErrorCode, Vec<Value>) {
        let rval = server.call(cls, func, args).unwrap();
        let (code, payload) = split_reply(&rval).unwrap();
        (code, payload.to_vec())
    }

    #[test]
    fn test_fader_over_ipc() {
        let (_loop, _engine, server) = server();

        let (code, payload) = call(&server, "Fader", "Create", &[Value::Int32(2)]);
        assert_eq!(code, ErrorCode::Ok);
        let h = payload[0].as_u32().unwrap();

        let (code, payload) = call(
            &server,
            "Fader",
            "SetDeziBel",
            &[Value::UInt32(h), Value::Float(-12.0)],
        );
        assert_eq!(code, ErrorCode::Ok);
        assert_eq!(payload, vec![Value::Float(-12.0)]);

        let (code, payload) = call(&server, "Fader", "GetDeziBel", &[Value::UInt32(h)]);
        assert_eq!(code, ErrorCode::Ok);
        assert_eq!(payload, vec![Value::Float(-12.0)]);

        let (code, _) = call(&server, "Fader", "Destroy", &[Value::UInt32(h)]);
        assert_eq!(code, ErrorCode::Ok);

        let (code, payload) = call(&server, "Fader", "GetDeziBel", &[Value::UInt32(h)]);
        assert_eq!(code, ErrorCode::InvalidReference);
        assert!(payload[0].as_str().is_some());
    }

    #[test]
    fn test_bad_fader_type_is_error() {
        let (_loop, _engine, server) = server();
        let (code, _) = call(&server, "Fader", "Create", &[Value::Int32(9)]);
        assert_eq!(code, ErrorCode::Error);
    }

    #[test]
    fn test_volmeter_handle_as_fader_is_rejected() {
        let (_loop, _engine, server) = server();
        let (_, payload) = call(&server, "Volmeter", "Create", &[Value::Int32(0)]);
        let meter = payload[0].clone();
        assert_eq!(payload[1], Value::UInt32(50));

        let (code, payload) = call(&server, "Fader", "GetDeflection", &[meter]);
        assert_eq!(code, ErrorCode::InvalidReference);
        assert_eq!(payload[0].as_str(), Some("Handle 0 refers to a volmeter, expected a fader"));
    }

    #[test]
    fn test_attach_unknown_source_is_not_found() {
        let (_loop, engine, server) = server();
        let (_, payload) = call(&server, "Volmeter", "Create", &[Value::Int32(1)]);
        let meter = payload[0].clone();

        let (code, _) = call(
            &server,
            "Volmeter",
            "Attach",
            &[meter.clone(), Value::from("mic")],
        );
        assert_eq!(code, ErrorCode::NotFound);

        engine.create_source("mic").unwrap();
        let (code, _) = call(&server, "Volmeter", "Attach", &[meter, Value::from("mic")]);
        assert_eq!(code, ErrorCode::Ok);
    }

    #[test]
    fn test_volmeter_polled_callbacks_over_ipc() {
        let (_loop, _engine, registry, server) = server_with_registry();
        let (_, payload) = call(&server, "Volmeter", "Create", &[Value::Int32(0)]);
        let meter = payload[0].clone();

        let (code, payload) = call(&server, "Volmeter", "AddCallback", &[meter.clone()]);
        assert_eq!(code, ErrorCode::Ok);
        assert_eq!(payload[1], Value::UInt32(1));
        let cb = payload[0].clone();

        let (code, payload) = call(&server, "Volmeter", "Query", &[meter.clone()]);
        assert_eq!(code, ErrorCode::Ok);
        assert_eq!(payload[0], Value::Float(SILENCE_DB));

        let h = meter.as_u32().unwrap();
        registry
            .fetch_volmeter(h)
            .unwrap()
            .emit_levels(-20.0, -23.0, -17.0, true);
        let (_, payload) = call(&server, "Volmeter", "Query", &[meter.clone()]);
        assert_eq!(
            payload,
            vec![
                Value::Float(-20.0),
                Value::Float(-23.0),
                Value::Float(-17.0),
                Value::UInt32(1),
            ]
        );

        let handles = Bytes::from([h.to_le_bytes(), 42u32.to_le_bytes()].concat());
        let (code, payload) = call(
            &server,
            "CallbackManager",
            "GlobalQuery",
            &[Value::Binary(handles)],
        );
        assert_eq!(code, ErrorCode::Ok);
        assert_eq!(payload[0], Value::UInt32(1));
        assert_eq!(payload[1], meter);
        assert_eq!(payload[4], Value::Float(-17.0));

        let (code, payload) = call(
            &server,
            "Volmeter",
            "RemoveCallback",
            &[meter.clone(), cb.clone()],
        );
        assert_eq!(code, ErrorCode::Ok);
        assert_eq!(payload, vec![Value::UInt32(0)]);

        let (code, _) = call(&server, "Volmeter", "RemoveCallback", &[meter, cb]);
        assert_eq!(code, ErrorCode::InvalidReference);
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_fader_polled_callbacks_over_ipc() {
        let (_loop, _engine, server) = server();
        let (_, payload) = call(&server, "Fader", "Create", &[Value::Int32(0)]);
        let fader = payload[0].clone();

        let (code, payload) = call(&server, "Fader", "AddCallback", &[fader.clone()]);
        assert_eq!(code, ErrorCode::Ok);
        let cb = payload[0].clone();

        call(&server, "Fader", "SetDeziBel", &[fader.clone(), Value::Float(-9.0)]);
        let (code, payload) = call(&server, "Fader", "Query", &[fader.clone()]);
        assert_eq!(code, ErrorCode::Ok);
        assert_eq!(payload, vec![Value::UInt32(1), Value::Float(-9.0)]);

        let (_, payload) = call(&server, "Fader", "RemoveCallback", &[fader, cb]);
        assert_eq!(payload, vec![Value::UInt32(0)]);
    }

    #[test]
    fn test_global_query_rejects_ragged_handle_list() {
        let (_loop, _engine, server) = server();
        let (code, _) = call(
            &server,
            "CallbackManager",
            "GlobalQuery",
            &[Value::Binary(Bytes::from_static(&[1, 2, 3]))],
        );
        assert_eq!(code, ErrorCode::Error);

        let (code, payload) = call(
            &server,
            "CallbackManager",
            "GlobalQuery",
            &[Value::Binary(Bytes::new())],
        );
        assert_eq!(code, ErrorCode::Ok);
        assert_eq!(payload, vec![Value::UInt32(0)]);
    }

    #[test]
    fn test_signature_mismatch_never_reaches_handler() {
        let (_loop, _engine, server) = server();
        let err = server
            .call("Fader", "Destroy", &[Value::UInt64(0)])
            .unwrap_err();
        assert!(matches!(err, IpcError::TypeMismatch { .. }));
    }
}

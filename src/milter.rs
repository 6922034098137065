use crate::config::PolicyConfig;
use crate::listener::MilterListener;
use crate::policy::PolicyEngine;
use crate::transaction::{Event, Reply, Session};
use indymilter::{run, Callbacks, Config as IndyConfig, Status};
use std::ffi::CString;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};

pub struct Milter {
    engine: Arc<PolicyEngine>,
}

fn status_for(reply: Reply) -> Status {
    match reply {
        Reply::Continue => Status::Continue,
        Reply::Accept => Status::Accept,
        Reply::Reject => Status::Reject,
        Reply::TempFail => Status::Tempfail,
    }
}

/// Feeds one event to the connection's session, creating the session on
/// first use.
fn dispatch(data: &mut Option<Session>, engine: &Arc<PolicyEngine>, event: Event) -> Status {
    let session = data.get_or_insert_with(|| Session::new(engine.clone()));
    status_for(session.handle(event))
}

fn first_arg(args: &[CString]) -> String {
    args.first()
        .map(|a| a.to_string_lossy().to_string())
        .unwrap_or_default()
}

async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Received SIGINT, shutting down");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("Received SIGINT, shutting down"),
        _ = terminate.recv() => log::info!("Received SIGTERM, shutting down"),
    }
}

impl Milter {
    pub fn new(config: Arc<PolicyConfig>) -> Self {
        Milter {
            engine: Arc::new(PolicyEngine::new(config)),
        }
    }

    pub async fn run(&self, listener: MilterListener) -> anyhow::Result<()> {
        let callbacks = self.callbacks();
        let config = IndyConfig::default();

        match listener {
            MilterListener::Unix(listener) => {
                run(listener, callbacks, config, shutdown_signal()).await?
            }
            MilterListener::Tcp(listener) => {
                run(listener, callbacks, config, shutdown_signal()).await?
            }
        }
        log::info!("Milter stopped");
        Ok(())
    }

    fn callbacks(&self) -> Callbacks<Session> {
        let engine = self.engine.clone();

        Callbacks {
            mail: Some(Box::new({
                let engine = engine.clone();
                move |ctx: &mut indymilter::Context<Session>, args| {
                    let engine = engine.clone();
                    Box::pin(async move {
                        let event = Event::MailFrom(first_arg(&args));
                        dispatch(&mut ctx.data, &engine, event)
                    })
                }
            })),

            rcpt: Some(Box::new({
                let engine = engine.clone();
                move |ctx: &mut indymilter::Context<Session>, args| {
                    let engine = engine.clone();
                    Box::pin(async move {
                        let event = Event::RcptTo(first_arg(&args));
                        dispatch(&mut ctx.data, &engine, event)
                    })
                }
            })),

            header: Some(Box::new({
                let engine = engine.clone();
                move |ctx: &mut indymilter::Context<Session>, name, value| {
                    let engine = engine.clone();
                    Box::pin(async move {
                        let event = Event::Header {
                            name: name.to_string_lossy().to_string(),
                            value: value.to_string_lossy().to_string(),
                        };
                        dispatch(&mut ctx.data, &engine, event)
                    })
                }
            })),

            eoh: Some(Box::new({
                let engine = engine.clone();
                move |ctx: &mut indymilter::Context<Session>| {
                    let engine = engine.clone();
                    Box::pin(async move { dispatch(&mut ctx.data, &engine, Event::EndOfHeaders) })
                }
            })),

            body: Some(Box::new({
                let engine = engine.clone();
                move |ctx: &mut indymilter::Context<Session>, chunk| {
                    let engine = engine.clone();
                    Box::pin(async move {
                        dispatch(&mut ctx.data, &engine, Event::BodyChunk(chunk.to_vec()))
                    })
                }
            })),

            eom: Some(Box::new({
                let engine = engine.clone();
                move |ctx: &mut indymilter::EomContext<Session>| {
                    let engine = engine.clone();
                    Box::pin(async move { dispatch(&mut ctx.data, &engine, Event::EndOfBody) })
                }
            })),

            abort: Some(Box::new({
                let engine = engine.clone();
                move |ctx: &mut indymilter::Context<Session>| {
                    let engine = engine.clone();
                    Box::pin(async move { dispatch(&mut ctx.data, &engine, Event::Abort) })
                }
            })),

            close: Some(Box::new(move |ctx: &mut indymilter::Context<Session>| {
                Box::pin(async move {
                    if let Some(mut session) = ctx.data.take() {
                        session.handle(Event::Abort);
                    }
                    log::debug!("Connection closed");
                    Status::Continue
                })
            })),

            ..Callbacks::new()
        }
    }
}

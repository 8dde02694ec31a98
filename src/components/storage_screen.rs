use crate::error::AppError;
use crate::sample_image::sample_jpeg;
use crate::services::{self, StoredImage};
use chrono::Local;
use dioxus::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    SavePrivate,
    SavePublic,
    RemovePublic,
    LookupPublic,
}

impl Action {
    fn label(&self) -> &'static str {
        match self {
            Action::SavePrivate => "Save private",
            Action::SavePublic => "Save public",
            Action::RemovePublic => "Remove public",
            Action::LookupPublic => "Lookup public",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Idle,
    Image(StoredImage),
    Removed(String),
    NoUri,
    Failed(String),
}

async fn perform(action: Action) -> Result<Outcome, AppError> {
    let service = services::init_storage_service()?;

    match action {
        Action::SavePrivate => {
            let stored = services::save_private(service, sample_jpeg()?).await?;
            Ok(Outcome::Image(stored))
        }
        Action::SavePublic => {
            let stored = services::save_public(service, sample_jpeg()?).await?;
            Ok(Outcome::Image(stored))
        }
        Action::RemovePublic => Ok(match services::remove_public(service).await? {
            Some(locator) => Outcome::Removed(service.locator_uri(&locator)),
            None => Outcome::NoUri,
        }),
        Action::LookupPublic => Ok(services::lookup_public(service)
            .await?
            .map(Outcome::Image)
            .unwrap_or(Outcome::NoUri)),
    }
}

/// Run `action` unless it is already in flight; the result lands in `target`
///
/// The task belongs to the screen: when the screen goes away the task is
/// dropped together with the storage operation it awaits.
fn start(
    action: Action,
    mut in_flight: Signal<Vec<Action>>,
    mut target: Signal<Outcome>,
    mut last_action: Signal<Option<String>>,
) {
    if in_flight.read().contains(&action) {
        return;
    }
    in_flight.write().push(action);

    spawn(async move {
        let outcome = perform(action).await.unwrap_or_else(|e| {
            log::error!("{} failed: {}", action.label(), e);
            Outcome::Failed(e.user_message())
        });
        target.set(outcome);
        last_action.set(Some(format!(
            "{} {}",
            Local::now().format("%H:%M:%S"),
            action.label()
        )));
        in_flight.write().retain(|a| *a != action);
    });
}

#[component]
fn OutcomeView(outcome: Outcome) -> Element {
    match outcome {
        Outcome::Idle => rsx! {},
        Outcome::Image(stored) => {
            let caption = stored.caption();
            rsx! {
                if let Some(src) = stored.data_url {
                    img { style: "width: 100%; max-height: 240px; object-fit: contain; border-radius: 8px; margin-top: 12px;", src: "{src}" }
                }
                p { style: "margin: 8px 0 0 0; font-size: 13px; color: #333; word-break: break-all;", "{caption}" }
            }
        }
        Outcome::Removed(uri) => rsx! {
            p { style: "margin: 8px 0 0 0; font-size: 13px; color: #3a3; word-break: break-all;", "Removed {uri}" }
        },
        Outcome::NoUri => rsx! {
            p { style: "margin: 8px 0 0 0; font-size: 13px; color: #666;", "No uri" }
        },
        Outcome::Failed(msg) => rsx! {
            div { style: "background: #fee; border: 1px solid #fcc; color: #c33; padding: 12px; margin-top: 12px; border-radius: 8px; font-size: 14px;",
                "⚠️ {msg}"
            }
        },
    }
}

#[component]
pub fn StorageScreen() -> Element {
    let private_outcome = use_signal(|| Outcome::Idle);
    let public_outcome = use_signal(|| Outcome::Idle);
    let in_flight = use_signal(Vec::<Action>::new);
    let last_action = use_signal(|| None::<String>);
    let mut notice = use_signal(|| None::<String>);

    // Ask for the storage permissions once on startup
    use_effect(move || match services::request_storage_permissions() {
        Ok(true) => log::info!("Storage permissions granted"),
        Ok(false) => log::info!("Storage permissions requested"),
        Err(e) => {
            log::error!("Storage service unavailable: {}", e);
            notice.set(Some(e.user_message()));
        }
    });

    let busy = move |action: Action| in_flight.read().contains(&action);

    rsx! {
        div { style: "padding: 16px; max-width: 600px; margin: 0 auto; min-height: 100vh; background: #f5f5f5;",
            h1 { style: "color: #0066cc; font-size: 24px; font-weight: 700; margin: 0 0 24px 0;",
                "Storage Showcase"
            }

            if let Some(msg) = notice() {
                div { style: "background: #fee; border: 1px solid #fcc; color: #c33; padding: 12px; margin-bottom: 16px; border-radius: 8px; font-size: 14px;",
                    "⚠️ {msg}"
                }
            }

            div { class: "card", style: "margin-bottom: 16px;",
                h2 { style: "font-size: 18px; margin: 0 0 12px 0;", "App storage" }
                button {
                    class: "btn-primary",
                    style: "width: 100%;",
                    disabled: busy(Action::SavePrivate),
                    onclick: move |_| start(Action::SavePrivate, in_flight, private_outcome, last_action),
                    {Action::SavePrivate.label()}
                }
                OutcomeView { outcome: private_outcome() }
            }

            div { class: "card", style: "margin-bottom: 16px;",
                h2 { style: "font-size: 18px; margin: 0 0 12px 0;", "Shared gallery" }
                div { style: "display: flex; flex-direction: column; gap: 8px;",
                    button {
                        class: "btn-primary",
                        disabled: busy(Action::SavePublic),
                        onclick: move |_| start(Action::SavePublic, in_flight, public_outcome, last_action),
                        {Action::SavePublic.label()}
                    }
                    button {
                        class: "btn-secondary",
                        disabled: busy(Action::RemovePublic),
                        onclick: move |_| start(Action::RemovePublic, in_flight, public_outcome, last_action),
                        {Action::RemovePublic.label()}
                    }
                    button {
                        class: "btn-secondary",
                        disabled: busy(Action::LookupPublic),
                        onclick: move |_| start(Action::LookupPublic, in_flight, public_outcome, last_action),
                        {Action::LookupPublic.label()}
                    }
                }
                OutcomeView { outcome: public_outcome() }
            }

            if let Some(entry) = last_action() {
                p { style: "font-size: 12px; color: #666;", "Last action: {entry}" }
            }
        }
    }
}

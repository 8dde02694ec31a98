use dioxus::prelude::*;

mod components;
mod error;
mod filesystem;
mod sample_image;
mod services;

use components::StorageScreen;

fn main() {
    // Initialize logging
    #[cfg(target_os = "android")]
    {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Debug)
                .with_tag("StorageShowcase"),
        );
    }

    #[cfg(not(target_os = "android"))]
    {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    log::info!("storage-showcase starting up!");
    dioxus::launch(App);
}

#[component]
fn App() -> Element {
    rsx! {
        div { style: "display: flex; flex-direction: column; height: 100vh; font-family: sans-serif;",
            div { style: "flex: 1; overflow-y: auto;",
                StorageScreen {}
            }
        }
    }
}

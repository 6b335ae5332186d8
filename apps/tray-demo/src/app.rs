//! Demo session: builds a menu on the headless surface, clicks through
//! it and shuts down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use traymenu_tray::{
    CallbackExecutor, HeadlessSurface, MenuItem, MouseButton, NativeMessage, Tray, TrayError,
};

use crate::config::Config;

/// Runs the demo until the tray exits, Ctrl-C, or the configured delay.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let surface = Arc::new(HeadlessSurface::new());
    let tray = Tray::with_executor(surface.clone(), CallbackExecutor::from_current_runtime());

    let (exit_tx, exit_rx) = oneshot::channel();
    tray.register(
        || tracing::info!("tray ready"),
        move || {
            let _ = exit_tx.send(());
        },
    )?;
    tray.apply_config(&config.tray)?;

    let items = build_menu(&tray, &config)?;
    let pump = tray.spawn_loop()?;

    if config.scripted_clicks {
        surface.post(NativeMessage::TrayClick(MouseButton::Left));
        for item in [&items.pause, &items.pause, &items.refresh] {
            surface.post(NativeMessage::MenuCommand(item.id()));
        }
    }

    let deadline = async {
        match config.quit_after_secs {
            0 => std::future::pending::<()>().await,
            secs => tokio::time::sleep(Duration::from_secs(secs)).await,
        }
    };

    tokio::select! {
        _ = exit_rx => {
            tracing::info!("quit requested via tray");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        _ = deadline => {
            tracing::info!("demo time is up");
        }
    }

    tray.quit();
    tokio::task::spawn_blocking(move || pump.join())
        .await?
        .map_err(|_| anyhow::anyhow!("tray pump panicked"))??;

    tracing::info!(state = ?tray.state(), "tray closed");
    Ok(())
}

struct DemoItems {
    pause: MenuItem,
    refresh: MenuItem,
}

fn build_menu(tray: &Tray, config: &Config) -> Result<DemoItems, TrayError> {
    let status = tray.add_menu_item(config.name.clone())?;
    let _ = status.disable();
    tray.add_separator()?;

    let pause = tray.add_menu_item("Pause")?;
    let hosts = tray.add_menu_item("Hosts")?;
    let host_items = ["alpha", "beta"]
        .into_iter()
        .map(|name| hosts.add_sub_menu_item(name))
        .collect::<Result<Vec<MenuItem>, _>>()?;

    let p = pause.clone();
    let _ = pause.set_callback(move || {
        let result = if p.checked() { p.uncheck() } else { p.check() };
        if result.is_ok() {
            tracing::info!(paused = p.checked(), "pause toggled");
        }
    });

    let refresh = hosts.add_sub_menu_item("Refresh")?;
    let _ = refresh.set_callback(move || {
        for host in &host_items {
            // Flicker each host to show that re-shown items keep their slot.
            let _ = host.hide();
            let _ = host.show();
            tracing::info!(%host, "host refreshed");
        }
    });

    tray.add_separator()?;
    let quit = tray.add_menu_item("Quit")?;
    let t = tray.clone();
    let _ = quit.set_callback(move || t.quit());

    tray.on_tray_opened(|| tracing::info!("menu opened"));

    Ok(DemoItems { pause, refresh })
}

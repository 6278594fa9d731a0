/*!
 * Linux Namespace Backend
 * True network isolation using unshare/setns, bind mounts and rtnetlink
 */

use super::netns::{on_dedicated_thread, run_in_namespace, NetnsGuard};
use super::traits::*;
use super::types::*;
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::{LOOPBACK, SELF_NETNS_PATH, THREAD_NETNS_PATH, THREAD_NET_DEV_PATH};
use futures::stream::TryStreamExt;
use log::{debug, info, warn};
use netlink_packet_route::link::{LinkAttribute, LinkMessage};
use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteMessage};
use nix::errno::Errno;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::Uid;
use rtnetlink::{new_connection, Handle, IpVersion};
use std::fs::{self, File};
use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Linux network namespace backend
#[derive(Debug, Clone, Default)]
pub struct LinuxBackend;

impl LinuxBackend {
    pub fn new() -> Self {
        info!("Namespace backend initialized (Linux network namespaces)");
        Self
    }
}

/// Open a netlink connection on a dedicated thread, optionally inside the
/// namespace at `ns`, and drive `f` to completion on it
fn with_netlink<F, Fut, T>(ns: Option<&Path>, f: F) -> SandboxResult<T>
where
    F: FnOnce(Handle) -> Fut + Send,
    Fut: Future<Output = SandboxResult<T>>,
    T: Send,
{
    on_dedicated_thread("netlink-worker", move || {
        // Declared first so it is dropped after the runtime and socket
        let _guard = match ns {
            Some(path) => Some(NetnsGuard::enter(path)?),
            None => None,
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SandboxError::Netlink(format!("Failed to build netlink runtime: {}", e)))?;

        runtime.block_on(async move {
            let (connection, handle, _) = new_connection().map_err(|e| {
                SandboxError::Netlink(format!("Failed to create netlink connection: {}", e))
            })?;
            tokio::spawn(connection);
            f(handle).await
        })
    })
}

fn netlink_err(what: &str, name: &str, e: rtnetlink::Error) -> SandboxError {
    SandboxError::Netlink(format!("Failed to {} {}: {}", what, name, e))
}

fn is_errno(e: &rtnetlink::Error, errno: Errno) -> bool {
    match e {
        rtnetlink::Error::NetlinkError(msg) => msg.code.map(|c| c.get()) == Some(-(errno as i32)),
        _ => false,
    }
}

async fn find_link(handle: &Handle, name: &str) -> SandboxResult<Option<LinkMessage>> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    match links.try_next().await {
        Ok(link) => Ok(link),
        Err(e) if is_errno(&e, Errno::ENODEV) => Ok(None),
        Err(e) => Err(netlink_err("get link", name, e)),
    }
}

fn link_name(link: &LinkMessage) -> Option<String> {
    link.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(name.clone()),
        _ => None,
    })
}

fn is_default_via(route: &RouteMessage, gateway: IpAddr) -> bool {
    route.header.destination_prefix_length == 0
        && route.attributes.iter().any(|attr| match (attr, gateway) {
            (RouteAttribute::Gateway(RouteAddress::Inet(a)), IpAddr::V4(g)) => *a == g,
            (RouteAttribute::Gateway(RouteAddress::Inet6(a)), IpAddr::V6(g)) => *a == g,
            _ => false,
        })
}

fn open_ns_file(path: &Path) -> SandboxResult<File> {
    File::open(path).map_err(|e| SandboxError::io(path, e))
}

impl NamespaceBackend for LinuxBackend {
    fn create_namespace(&self, key: &Path) -> SandboxResult<()> {
        if let Some(parent) = key.parent() {
            fs::create_dir_all(parent).map_err(|e| SandboxError::io(parent, e))?;
        }
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(key)
            .map_err(|e| SandboxError::io(key, e))?;

        let bound = on_dedicated_thread("netns-create", || {
            let _guard = NetnsGuard::unshare()?;
            mount(
                Some(THREAD_NETNS_PATH),
                key,
                None::<&str>,
                MsFlags::MS_BIND,
                None::<&str>,
            )
            .map_err(|e| SandboxError::io(key, io::Error::from(e)))
        });
        if let Err(e) = bound {
            let _ = fs::remove_file(key);
            return Err(e);
        }

        let loopback = with_netlink(Some(key), |handle| async move {
            if let Some(lo) = find_link(&handle, LOOPBACK).await? {
                handle
                    .link()
                    .set(lo.header.index)
                    .up()
                    .execute()
                    .await
                    .map_err(|e| netlink_err("bring up", LOOPBACK, e))?;
            }
            Ok(())
        });
        if let Err(e) = loopback {
            // Unbind and remove the key so nothing outlives the failed create
            if let Err(cleanup) = self.delete_namespace(key) {
                warn!("Failed to remove half-created namespace {}: {}", key.display(), cleanup);
            }
            return Err(e);
        }

        info!("Created network namespace: {}", key.display());
        Ok(())
    }

    fn delete_namespace(&self, key: &Path) -> SandboxResult<()> {
        if !key.exists() {
            return Ok(());
        }

        match umount2(key, MntFlags::MNT_DETACH) {
            Ok(()) | Err(Errno::EINVAL) | Err(Errno::ENOENT) => {}
            Err(e) => return Err(SandboxError::io(key, io::Error::from(e))),
        }

        match fs::remove_file(key) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SandboxError::io(key, e)),
        }

        info!("Destroyed network namespace: {}", key.display());
        Ok(())
    }

    fn attach_interface(&self, key: &Path, iface: &Interface, name: &str) -> SandboxResult<()> {
        let src = iface.src_name.as_str();

        // Refuse before moving anything if the final name is taken
        with_netlink(Some(key), |handle| async move {
            match find_link(&handle, name).await? {
                Some(_) => Err(SandboxError::LinkExists(name.to_string())),
                None => Ok(()),
            }
        })?;

        let ns_file = open_ns_file(key)?;
        let ns_fd = ns_file.as_raw_fd();
        with_netlink(None, |handle| async move {
            let link = find_link(&handle, src)
                .await?
                .ok_or_else(|| SandboxError::LinkNotFound(src.to_string()))?;
            handle
                .link()
                .set(link.header.index)
                .setns_by_fd(ns_fd)
                .execute()
                .await
                .map_err(|e| netlink_err("move link", src, e))
        })?;
        drop(ns_file);

        with_netlink(Some(key), |handle| async move {
            let link = find_link(&handle, src)
                .await?
                .ok_or_else(|| SandboxError::LinkNotFound(src.to_string()))?;
            let index = link.header.index;

            handle
                .link()
                .set(index)
                .name(name.to_string())
                .execute()
                .await
                .map_err(|e| netlink_err("rename link", src, e))?;

            if let Some(v4) = iface.address {
                handle
                    .address()
                    .add(index, IpAddr::V4(v4.ip()), v4.prefix())
                    .execute()
                    .await
                    .map_err(|e| netlink_err("add address on", name, e))?;
            }
            if let Some(v6) = iface.address_ipv6 {
                handle
                    .address()
                    .add(index, IpAddr::V6(v6.ip()), v6.prefix())
                    .execute()
                    .await
                    .map_err(|e| netlink_err("add address on", name, e))?;
            }

            handle
                .link()
                .set(index)
                .up()
                .execute()
                .await
                .map_err(|e| netlink_err("bring up", name, e))
        })?;

        debug!("Moved {} into {} as {}", src, key.display(), name);
        Ok(())
    }

    fn detach_interface(&self, key: &Path, iface: &Interface, name: &str) -> SandboxResult<()> {
        let src = iface.src_name.as_str();

        with_netlink(None, |handle| async move {
            match find_link(&handle, src).await? {
                Some(_) => Err(SandboxError::LinkExists(src.to_string())),
                None => Ok(()),
            }
        })?;

        // The calling thread is never left inside a sandbox
        let host_file = open_ns_file(Path::new(THREAD_NETNS_PATH))?;
        let host_fd = host_file.as_raw_fd();
        with_netlink(Some(key), |handle| async move {
            let link = find_link(&handle, name)
                .await?
                .ok_or_else(|| SandboxError::LinkNotFound(name.to_string()))?;
            let index = link.header.index;

            handle
                .link()
                .set(index)
                .down()
                .execute()
                .await
                .map_err(|e| netlink_err("bring down", name, e))?;
            handle
                .link()
                .set(index)
                .name(src.to_string())
                .execute()
                .await
                .map_err(|e| netlink_err("rename link", name, e))?;
            handle
                .link()
                .set(index)
                .setns_by_fd(host_fd)
                .execute()
                .await
                .map_err(|e| netlink_err("move link", src, e))
        })?;

        debug!("Moved {} out of {} as {}", name, key.display(), src);
        Ok(())
    }

    fn add_default_route(&self, key: &Path, gateway: IpAddr) -> SandboxResult<()> {
        with_netlink(Some(key), |handle| async move {
            let result = match gateway {
                IpAddr::V4(gw) => handle.route().add().v4().gateway(gw).execute().await,
                IpAddr::V6(gw) => handle.route().add().v6().gateway(gw).execute().await,
            };
            result.map_err(|e| SandboxError::Route {
                gateway,
                reason: e.to_string(),
            })
        })
    }

    fn remove_default_route(&self, key: &Path, gateway: IpAddr) -> SandboxResult<()> {
        with_netlink(Some(key), |handle| async move {
            let version = match gateway {
                IpAddr::V4(_) => IpVersion::V4,
                IpAddr::V6(_) => IpVersion::V6,
            };

            let routes: Vec<RouteMessage> = handle
                .route()
                .get(version)
                .execute()
                .try_collect()
                .await
                .map_err(|e| SandboxError::Route {
                    gateway,
                    reason: e.to_string(),
                })?;
            let found = routes.into_iter().find(|r| is_default_via(r, gateway));

            let route = found.ok_or_else(|| SandboxError::Route {
                gateway,
                reason: "no such route".to_string(),
            })?;
            handle
                .route()
                .del(route)
                .execute()
                .await
                .map_err(|e| SandboxError::Route {
                    gateway,
                    reason: e.to_string(),
                })
        })
    }

    fn link_names(&self, key: &Path) -> SandboxResult<Vec<String>> {
        with_netlink(Some(key), |handle| async move {
            let links: Vec<LinkMessage> = handle
                .link()
                .get()
                .execute()
                .try_collect()
                .await
                .map_err(|e| netlink_err("list links in", "namespace", e))?;

            let mut names = Vec::with_capacity(links.len());
            for link in &links {
                match link_name(link) {
                    Some(name) => names.push(name),
                    None => warn!("Link {} has no name attribute", link.header.index),
                }
            }
            Ok(names)
        })
    }

    fn read_counters(&self, key: &Path) -> SandboxResult<String> {
        run_in_namespace(key, || {
            fs::read_to_string(THREAD_NET_DEV_PATH)
                .map_err(|e| SandboxError::io(THREAD_NET_DEV_PATH, e))
        })
    }

    fn is_supported(&self) -> bool {
        Path::new(SELF_NETNS_PATH).exists() && Uid::effective().is_root()
    }

    fn platform(&self) -> PlatformType {
        PlatformType::LinuxNetns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform() {
        assert_eq!(LinuxBackend::new().platform(), PlatformType::LinuxNetns);
    }

    #[test]
    fn test_delete_missing_key_is_ok() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = dir.path().join("never-created");
        LinuxBackend::new().delete_namespace(&key).unwrap();
    }
}

use std::env;
use std::net::SocketAddr;

use city_api::{serve, GroupService};
use contracts::{
    CompleteGoalRequest, CreateGroupRequest, FillCityRequest, Group, JoinGroupRequest,
    SelectBuildRequest,
};

fn print_usage() {
    println!("city-cli <command>");
    println!("commands:");
    println!("  serve [addr]");
    println!("    default addr: 127.0.0.1:8080");
    println!("  create <group_name> <member> <daily_goal> [reset_time HH:MM]");
    println!("  show <group_id>");
    println!("  join <group_code> <member>");
    println!("  complete <group_id> <member>");
    println!("  build <group_id> <member> <house|apartment|skyscraper>");
    println!("  fill <group_id> [count]");
    println!("  asteroid <group_id>");
    println!("  delete <group_id>");
    println!("sqlite path comes from CITY_SQLITE_PATH (default bittycity.sqlite)");
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_socket_addr(value: Option<&String>) -> Result<SocketAddr, String> {
    let raw = value.map(String::as_str).unwrap_or("127.0.0.1:8080");
    raw.parse::<SocketAddr>()
        .map_err(|_| format!("invalid addr: {raw}"))
}

fn sqlite_path() -> String {
    env::var("CITY_SQLITE_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "bittycity.sqlite".to_string())
}

fn open_service() -> Result<GroupService, String> {
    GroupService::open(sqlite_path()).map_err(|err| format!("failed to open store: {err}"))
}

fn require_arg<'a>(args: &'a [String], index: usize, label: &str) -> Result<&'a String, String> {
    args.get(index).ok_or_else(|| format!("missing {label}"))
}

fn print_group(group: &Group) -> Result<(), String> {
    let rendered =
        serde_json::to_string_pretty(group).map_err(|err| format!("render failed: {err}"))?;
    println!("{rendered}");
    Ok(())
}

fn run_local_command(command: &str, args: &[String]) -> Result<(), String> {
    let mut service = open_service()?;

    let group = match command {
        "create" => {
            let request = CreateGroupRequest {
                group_name: require_arg(args, 2, "group_name")?.clone(),
                member: require_arg(args, 3, "member")?.clone(),
                daily_goal: require_arg(args, 4, "daily_goal")?.clone(),
                goal_reset_time: args
                    .get(5)
                    .cloned()
                    .unwrap_or_else(|| "00:00".to_string()),
            };
            service.create_group(request)
        }
        "show" => service.get_group(require_arg(args, 2, "group_id")?),
        "join" => service.join_group(JoinGroupRequest {
            group_code: require_arg(args, 2, "group_code")?.clone(),
            member: require_arg(args, 3, "member")?.clone(),
        }),
        "complete" => service.complete_goal(
            require_arg(args, 2, "group_id")?,
            CompleteGoalRequest {
                member: require_arg(args, 3, "member")?.clone(),
            },
        ),
        "build" => service.select_build(
            require_arg(args, 2, "group_id")?,
            SelectBuildRequest {
                member: require_arg(args, 3, "member")?.clone(),
                build_type: require_arg(args, 4, "building type")?.clone(),
            },
        ),
        "fill" => {
            let count = args
                .get(3)
                .map(|value| {
                    value
                        .parse::<usize>()
                        .map_err(|_| format!("invalid count: {value}"))
                })
                .transpose()?;
            service.fill_city(require_arg(args, 2, "group_id")?, FillCityRequest { count })
        }
        "asteroid" => service.force_asteroid(require_arg(args, 2, "group_id")?),
        "delete" => {
            let group_id = require_arg(args, 2, "group_id")?;
            service
                .delete_group(group_id)
                .map_err(|err| err.to_string())?;
            println!("deleted {group_id}");
            return Ok(());
        }
        _ => return Err(format!("unknown command: {command}")),
    };

    let group = group.map_err(|err| err.to_string())?;
    print_group(&group)
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    match command {
        Some("serve") => match parse_socket_addr(args.get(2)) {
            Ok(addr) => {
                println!("serving api on http://{addr}");
                if let Err(err) = serve(addr).await {
                    eprintln!("server error: {err}");
                    std::process::exit(1);
                }
            }
            Err(err) => {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        },
        Some(
            local @ ("create" | "show" | "join" | "complete" | "build" | "fill" | "asteroid"
            | "delete"),
        ) => {
            if let Err(err) = run_local_command(local, &args) {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        }
        _ => {
            print_usage();
        }
    }
}

//! Demonstration MCP server.
//!
//! Serves a handful of test tools and resources over stdio, or over HTTP/SSE
//! when started with `--http <ADDR>`. Logs go to stderr.

use clap::Parser;
use mcp_engine::tools::ArgumentsExt;
use mcp_engine::transport::{SseServer, SseServerOptions};
use mcp_engine::types::{Resource, ResourceTemplate};
use mcp_engine::{ParameterBuilder, ParameterType, Server, ToolBuilder};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mcp-demo-server", version, about = "Demonstration MCP server")]
struct Args {
    /// Serve HTTP/SSE on this address instead of stdio
    #[arg(long, value_name = "ADDR")]
    http: Option<String>,

    /// Comma separated CORS origins for --http
    #[arg(long, value_delimiter = ',')]
    allowed_origins: Vec<String>,
}

#[derive(Deserialize, JsonSchema)]
struct AddArgs {
    /// first number
    a: i64,
    /// second number
    b: i64,
}

/// A complicated object
#[derive(Deserialize, JsonSchema)]
struct ComplicatedObject {
    /// The name of the object
    name: String,
    /// The age of the object
    age: i64,
    /// The hobbies of the object
    hobbies: Vec<String>,
}

#[derive(Deserialize, JsonSchema)]
struct AddComplexArgs {
    obj: ComplicatedObject,
}

async fn register_tools(server: &Server) {
    let tools = server.tools();

    tools
        .register_fn(
            ToolBuilder::new("hello", "just returns a message for testing.").build(),
            |_| Ok("hello, claude."),
        )
        .await;

    tools
        .register_fn(
            ToolBuilder::new("echo", "returns the input string back")
                .string_param("input", "the string to echo")
                .build(),
            |args| args.required::<String>("input"),
        )
        .await;

    tools
        .register_typed("add", "Add Two Numbers", |args: AddArgs| async move {
            Ok::<_, anyhow::Error>((args.a + args.b).to_string())
        })
        .await;

    tools
        .register_typed(
            "add_complex",
            "Adds a complex object",
            |args: AddComplexArgs| async move {
                let obj = args.obj;
                Ok::<_, anyhow::Error>(format!(
                    "Name: {}, Age: {}, Hobbies: {}",
                    obj.name,
                    obj.age,
                    obj.hobbies.join(", ")
                ))
            },
        )
        .await;

    tools
        .register_fn(
            ToolBuilder::new(
                "throw_exception",
                "fails on purpose, to check failures come back as results",
            )
            .build(),
            |_| -> anyhow::Result<String> { Err(anyhow::anyhow!("This is an exception")) },
        )
        .await;

    tools
        .register_fn(
            ToolBuilder::new("write-to-console", "write a string to the console")
                .string_param("message", "text to write")
                .build(),
            |args| {
                let message: String = args.required("message")?;
                // stdout carries the protocol
                eprintln!("{}", message);
                Ok(())
            },
        )
        .await;

    tools
        .register_fn(
            ToolBuilder::new("dynamicTool", "a tool registered without a typed signature")
                .string_param("input", "who to greet")
                .add_parameter(
                    ParameterBuilder::new("input2", ParameterType::String)
                        .description("a second line")
                        .optional()
                        .build(),
                )
                .build(),
            |args| {
                let input: String = args.required("input")?;
                let input2: String = args.or_default("input2")?;
                Ok(format!("hello, {}.\n{}", input, input2))
            },
        )
        .await;

    tools
        .register_async(
            ToolBuilder::new("async-tool", "completes asynchronously. should return 'success'")
                .build(),
            |_| async {
                tokio::task::yield_now().await;
                Ok::<_, anyhow::Error>("success")
            },
        )
        .await;
}

async fn register_resources(server: &Server) {
    let resources = server.resources();
    resources
        .add_template(ResourceTemplate::new("name", "test://{name}").with_description("a greeting"))
        .await;
    resources
        .add_resource(
            Resource::new("settings", "test://settings")
                .with_description("the settings document")
                .with_mime_type("string"),
        )
        .await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();

    let server = Server::builder("TestServer", env!("CARGO_PKG_VERSION"))
        .with_instructions("Demonstration server with test tools")
        .build();
    register_tools(&server).await;
    register_resources(&server).await;

    match args.http {
        Some(bind_address) => {
            let options = SseServerOptions {
                bind_address,
                allowed_origins: (!args.allowed_origins.is_empty()).then_some(args.allowed_origins),
                ..Default::default()
            };
            info!(address = %options.bind_address, "Starting HTTP/SSE server");
            SseServer::new(server, options).run().await?;
        }
        None => server.serve_stdio().await?,
    }

    Ok(())
}

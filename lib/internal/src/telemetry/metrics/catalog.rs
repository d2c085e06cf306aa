pub const DEFAULT_PREFIX: &str = "graphql_gateway";

pub mod values {
    pub const UNKNOWN: &str = "UNKNOWN";

    #[derive(Clone, Copy, Debug, PartialEq, Eq, strum::IntoStaticStr)]
    pub enum ErrorKind {
        /// The executor call could not complete.
        #[strum(serialize = "transport")]
        Transport,
        /// The subschema answered with GraphQL errors.
        #[strum(serialize = "graphql")]
        GraphQL,
    }

    impl ErrorKind {
        pub fn as_str(self) -> &'static str {
            self.into()
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, strum::IntoStaticStr)]
    pub enum FetchMode {
        #[strum(serialize = "single")]
        Single,
        #[strum(serialize = "batched")]
        Batched,
    }

    impl FetchMode {
        pub fn as_str(self) -> &'static str {
            self.into()
        }
    }
}

pub mod labels {
    pub const SUBGRAPH_NAME: &str = "subgraphName";
    pub const OPERATION_TYPE: &str = "operationType";
    pub const OPERATION_NAME: &str = "operationName";
    pub const ERROR_KIND: &str = "errorKind";
    pub const FETCH_MODE: &str = "fetchMode";
}

pub mod names {
    pub const SUBGRAPH_EXECUTE_DURATION: &str = "subgraph_execute_duration";
    pub const SUBGRAPH_EXECUTE_ERRORS: &str = "subgraph_execute_errors";
    pub const FETCH_DURATION: &str = "fetch_duration";
    pub const BATCH_SIZE: &str = "batch_size";
}

pub struct MetricDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

pub const METRIC_DESCRIPTORS: &[MetricDescriptor] = &[
    MetricDescriptor {
        name: names::SUBGRAPH_EXECUTE_DURATION,
        help: "Time spent executing a delegated request against a subgraph, in seconds",
        labels: &[
            labels::SUBGRAPH_NAME,
            labels::OPERATION_TYPE,
            labels::OPERATION_NAME,
        ],
    },
    MetricDescriptor {
        name: names::SUBGRAPH_EXECUTE_ERRORS,
        help: "Number of delegated requests that failed or returned GraphQL errors",
        labels: &[
            labels::SUBGRAPH_NAME,
            labels::OPERATION_TYPE,
            labels::OPERATION_NAME,
            labels::ERROR_KIND,
        ],
    },
    MetricDescriptor {
        name: names::FETCH_DURATION,
        help: "Time spent in a single invocation of a subgraph executor, in seconds",
        labels: &[labels::SUBGRAPH_NAME, labels::FETCH_MODE],
    },
    MetricDescriptor {
        name: names::BATCH_SIZE,
        help: "Number of distinct requests sent in a single executor invocation",
        labels: &[labels::SUBGRAPH_NAME],
    },
];

pub fn descriptor(name: &str) -> Option<&'static MetricDescriptor> {
    METRIC_DESCRIPTORS.iter().find(|descriptor| descriptor.name == name)
}

/// Joins the configured prefix (or the default one) with a metric name.
pub fn full_name(prefix: Option<&str>, name: &str) -> String {
    let prefix = prefix.unwrap_or(DEFAULT_PREFIX);
    if prefix.is_empty() {
        return name.to_string();
    }
    format!("{prefix}_{name}")
}

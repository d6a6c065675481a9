//! Typed name definitions for control plane resources.

use crate::define_name;

define_name!(ProjectName, "project");
define_name!(ClusterName, "cluster");
define_name!(EnvironmentName, "environment");
